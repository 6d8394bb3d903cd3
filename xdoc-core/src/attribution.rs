//! Ranked per-feature attribution of the predicted class.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::model::GradientBoostedModel;
use crate::preprocess::{FeatureMatrix, RawValue};
use crate::schema::DiseaseSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureAttribution {
    pub feature: String,
    pub raw_value: RawValue,
    /// Signed contribution to the class margin (log-odds).
    pub attribution_value: f64,
    pub contribution_percent: f64,
}

/// Attribution of one class, sorted by descending magnitude.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    pub class: usize,
    pub base_value: f64,
    pub margin: f64,
    pub features: Vec<FeatureAttribution>,
}

impl Attribution {
    /// The `n` strongest factors.
    pub fn top(&self, n: usize) -> &[FeatureAttribution] {
        &self.features[..n.min(self.features.len())]
    }
}

/// Exact TreeSHAP attribution of `class` for the single row in `input`.
pub fn attribute(
    model: &GradientBoostedModel,
    schema: &DiseaseSchema,
    input: &FeatureMatrix,
    class: usize,
) -> Result<Attribution> {
    let explained = model.attribute(input.row(), class)?;
    debug!(
        class,
        base_value = explained.base_value,
        margin = explained.margin,
        "computed tree attribution"
    );
    Ok(Attribution {
        class,
        base_value: explained.base_value,
        margin: explained.margin,
        features: rank(schema, input.raw_values(), &explained.values),
    })
}

/// Pairs values with their features and sorts them by descending `|value|`.
///
/// The sort is stable, so equal magnitudes keep schema order. Percentages are
/// shares of the total magnitude; if every value is zero they are all zero.
pub fn rank(schema: &DiseaseSchema, raw: &[RawValue], values: &[f64]) -> Vec<FeatureAttribution> {
    let total: f64 = values.iter().map(|v| v.abs()).sum();

    let mut ranked: Vec<FeatureAttribution> = schema
        .features
        .iter()
        .zip(raw.iter())
        .zip(values.iter())
        .map(|((spec, raw_value), value)| FeatureAttribution {
            feature: spec.name.to_string(),
            raw_value: raw_value.clone(),
            attribution_value: *value,
            contribution_percent: if total > 0.0 {
                100.0 * value.abs() / total
            } else {
                0.0
            },
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.attribution_value
            .abs()
            .total_cmp(&a.attribution_value.abs())
    });
    ranked
}
