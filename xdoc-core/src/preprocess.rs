//! Raw feature mapping → fixed-order model input.
//!
//! The transform parameters come from a fitted artifact and are never refit at
//! request time. Categorical columns are ordinal-encoded first, then every
//! column is standardized with the fitted mean and scale.

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::error::{Result, SchemaViolation, XdocError};
use crate::schema::{DiseaseSchema, FeatureKind, FeatureSpec};

/// Incoming feature mapping as delivered by the HTTP layer.
pub type FeatureMap = serde_json::Map<String, Value>;

/// A feature value as received, after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Category(String),
}

impl std::fmt::Display for RawValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawValue::Number(n) => write!(f, "{n}"),
            RawValue::Category(c) => f.write_str(c),
        }
    }
}

/// Serialized form of a fitted scaler + ordinal encoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessorArtifact {
    pub columns: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<String>>,
}

/// Model input of shape `(1, n_features)` in schema order, together with the
/// validated raw values it was derived from.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    values: Array2<f64>,
    raw: Vec<RawValue>,
}

impl FeatureMatrix {
    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    /// The single input row.
    pub fn row(&self) -> ArrayView1<'_, f64> {
        self.values.row(0)
    }

    pub fn raw_values(&self) -> &[RawValue] {
        &self.raw
    }
}

#[derive(Debug, Clone)]
pub struct Preprocessor {
    schema: &'static DiseaseSchema,
    mean: Vec<f64>,
    scale: Vec<f64>,
    /// Per column: ordinal levels for categorical columns.
    encoders: Vec<Option<Vec<String>>>,
}

impl Preprocessor {
    /// Builds a transform from a fitted artifact, checking it against the schema.
    pub fn from_artifact(
        schema: &'static DiseaseSchema,
        artifact: PreprocessorArtifact,
        source: &str,
    ) -> Result<Self> {
        let expected: Vec<&str> = schema.feature_names().collect();
        if artifact.columns.iter().map(String::as_str).ne(expected.iter().copied()) {
            return Err(XdocError::artifact(
                source,
                format!(
                    "column order {:?} does not match schema {:?}",
                    artifact.columns, expected
                ),
            ));
        }
        if artifact.mean.len() != schema.len() || artifact.scale.len() != schema.len() {
            return Err(XdocError::artifact(
                source,
                format!(
                    "expected {} mean/scale entries, got {}/{}",
                    schema.len(),
                    artifact.mean.len(),
                    artifact.scale.len()
                ),
            ));
        }
        if artifact
            .mean
            .iter()
            .chain(artifact.scale.iter())
            .any(|v| !v.is_finite())
        {
            return Err(XdocError::artifact(source, "non-finite mean or scale"));
        }

        let mut categories = artifact.categories;
        let mut encoders = Vec::with_capacity(schema.len());
        for spec in schema.features {
            match spec.kind {
                FeatureKind::Numeric { .. } => encoders.push(None),
                FeatureKind::Categorical { levels } => {
                    let fitted = categories.remove(spec.name).ok_or_else(|| {
                        XdocError::artifact(
                            source,
                            format!("no fitted categories for `{}`", spec.name),
                        )
                    })?;
                    if let Some(level) = levels.iter().find(|l| !fitted.iter().any(|f| f == *l)) {
                        return Err(XdocError::artifact(
                            source,
                            format!("category `{level}` of `{}` was not fitted", spec.name),
                        ));
                    }
                    encoders.push(Some(fitted));
                }
            }
        }

        Ok(Self {
            schema,
            mean: artifact.mean,
            scale: artifact.scale,
            encoders,
        })
    }

    /// Reads and validates a JSON preprocessing artifact.
    pub fn load(schema: &'static DiseaseSchema, path: &Path) -> Result<Self> {
        let source = path.display().to_string();
        let bytes =
            std::fs::read(path).map_err(|e| XdocError::artifact(&source, e.to_string()))?;
        let artifact: PreprocessorArtifact = serde_json::from_slice(&bytes)
            .map_err(|e| XdocError::artifact(&source, e.to_string()))?;
        Self::from_artifact(schema, artifact, &source)
    }

    /// Identity transform for pipelines assembled in memory: categories are
    /// encoded by their position in the schema and nothing is standardized.
    /// Artifact loading never substitutes it for a missing fitted transform.
    pub fn passthrough(schema: &'static DiseaseSchema) -> Self {
        let encoders = schema
            .features
            .iter()
            .map(|spec| match spec.kind {
                FeatureKind::Numeric { .. } => None,
                FeatureKind::Categorical { levels } => {
                    Some(levels.iter().map(|l| l.to_string()).collect())
                }
            })
            .collect();
        Self {
            schema,
            mean: vec![0.0; schema.len()],
            scale: vec![1.0; schema.len()],
            encoders,
        }
    }

    pub fn schema(&self) -> &'static DiseaseSchema {
        self.schema
    }

    /// Validates `features` against the schema and applies the fitted transform.
    pub fn transform(&self, features: &FeatureMap) -> Result<FeatureMatrix> {
        for key in features.keys() {
            if self.schema.position(key).is_none() {
                debug!(feature = %key, disease = %self.schema.disease, "ignoring unknown feature");
            }
        }

        let n = self.schema.len();
        let mut raw = Vec::with_capacity(n);
        let mut scaled = Vec::with_capacity(n);

        for (idx, spec) in self.schema.features.iter().enumerate() {
            let value = match features.get(spec.name) {
                None | Some(Value::Null) => {
                    return Err(SchemaViolation::Missing(spec.name.to_string()).into());
                }
                Some(value) => value,
            };

            let (raw_value, encoded) = match (&spec.kind, &self.encoders[idx]) {
                (FeatureKind::Numeric { constraint, .. }, _) => {
                    let number = coerce_number(spec, value)?;
                    if !constraint.admits(number) {
                        return Err(SchemaViolation::Constraint {
                            feature: spec.name.to_string(),
                            constraint: constraint.describe(),
                            value: number,
                        }
                        .into());
                    }
                    (RawValue::Number(number), number)
                }
                (FeatureKind::Categorical { levels }, Some(fitted)) => {
                    let level = coerce_category(spec, *levels, value)?;
                    let code = fitted
                        .iter()
                        .position(|f| f == level)
                        .ok_or_else(|| SchemaViolation::OutOfDomain {
                            feature: spec.name.to_string(),
                            value: level.to_string(),
                            allowed: fitted.clone(),
                        })?;
                    (RawValue::Category(level.to_string()), code as f64)
                }
                (FeatureKind::Categorical { .. }, None) => {
                    return Err(XdocError::artifact(
                        self.schema.disease.as_str(),
                        format!("no encoder for categorical feature `{}`", spec.name),
                    ));
                }
            };

            let scale = if self.scale[idx] == 0.0 {
                1.0
            } else {
                self.scale[idx]
            };
            raw.push(raw_value);
            scaled.push((encoded - self.mean[idx]) / scale);
        }

        let values = Array2::from_shape_fn((1, n), |(_, j)| scaled[j]);
        debug!(disease = %self.schema.disease, columns = n, "features transformed");
        Ok(FeatureMatrix { values, raw })
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("string {s:?}"),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
        other => other.to_string(),
    }
}

fn coerce_number(spec: &FeatureSpec, value: &Value) -> Result<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(XdocError::Type {
            feature: spec.name.to_string(),
            expected: "a finite number",
            found: describe(value),
        }),
    }
}

fn coerce_category(
    spec: &FeatureSpec,
    levels: &'static [&'static str],
    value: &Value,
) -> Result<&'static str> {
    let Value::String(s) = value else {
        return Err(XdocError::Type {
            feature: spec.name.to_string(),
            expected: "a category string",
            found: describe(value),
        });
    };
    let wanted = s.trim();
    levels
        .iter()
        .copied()
        .find(|level| level.eq_ignore_ascii_case(wanted))
        .ok_or_else(|| {
            SchemaViolation::OutOfDomain {
                feature: spec.name.to_string(),
                value: s.clone(),
                allowed: levels.iter().map(|l| l.to_string()).collect(),
            }
            .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CARDIOVASCULAR_SCHEMA, DIABETES_SCHEMA};
    use serde_json::json;

    fn diabetes_input() -> FeatureMap {
        json!({
            "AGE": 45, "Urea": 30, "Cr": 0.9, "HbA1c": 6.8, "Chol": 190,
            "TG": 150, "HDL": 45, "LDL": 110, "VLDL": 20, "BMI": 27.3
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn cardio_input() -> FeatureMap {
        json!({
            "age": 58, "gender": "Male", "blood_pressure": 145,
            "cholesterol_level": 240, "exercise_habits": "low", "smoking": "Yes",
            "family_heart_disease": "No", "diabetes": "No", "bmi": 29.1,
            "high_blood_pressure": "Yes", "low_hdl_cholesterol": "No",
            "high_ldl_cholesterol": "Yes", "alcohol_consumption": "Medium",
            "stress_level": "High", "sleep_hours": 6, "sugar_consumption": "High",
            "triglyceride_level": 210, "fasting_blood_sugar": 105,
            "crp_level": 3.2, "homocysteine_level": 12
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn diabetes_artifact() -> PreprocessorArtifact {
        PreprocessorArtifact {
            columns: DIABETES_SCHEMA.feature_names().map(String::from).collect(),
            mean: vec![50.0, 25.0, 1.0, 5.5, 200.0, 150.0, 50.0, 100.0, 30.0, 25.0],
            scale: vec![10.0, 5.0, 0.5, 1.0, 40.0, 50.0, 10.0, 20.0, 10.0, 0.0],
            categories: BTreeMap::new(),
        }
    }

    #[test]
    fn output_follows_schema_order() {
        let pre = Preprocessor::from_artifact(&DIABETES_SCHEMA, diabetes_artifact(), "test")
            .unwrap();
        let matrix = pre.transform(&diabetes_input()).unwrap();

        assert_eq!(matrix.shape(), (1, DIABETES_SCHEMA.len()));
        let row = matrix.row();
        assert!((row[0] - (-0.5)).abs() < 1e-12); // AGE (45 - 50) / 10
        assert!((row[3] - 1.3).abs() < 1e-12); // HbA1c (6.8 - 5.5) / 1
        assert!((row[9] - 2.3).abs() < 1e-12); // BMI, zero scale treated as 1
        assert_eq!(matrix.raw_values()[3], RawValue::Number(6.8));
    }

    #[test]
    fn key_order_of_input_is_irrelevant() {
        let pre = Preprocessor::passthrough(&DIABETES_SCHEMA);
        let forward = pre.transform(&diabetes_input()).unwrap();

        let mut reversed = FeatureMap::new();
        for (k, v) in diabetes_input().into_iter().rev() {
            reversed.insert(k, v);
        }
        let backward = pre.transform(&reversed).unwrap();
        assert_eq!(forward.row(), backward.row());
    }

    #[test]
    fn categories_are_encoded_before_scaling() {
        let mut categories = BTreeMap::new();
        for spec in CARDIOVASCULAR_SCHEMA.features {
            if let FeatureKind::Categorical { levels } = spec.kind {
                // Fitted order differs from the schema order on purpose.
                let mut fitted: Vec<String> = levels.iter().map(|l| l.to_string()).collect();
                fitted.sort();
                categories.insert(spec.name.to_string(), fitted);
            }
        }
        let n = CARDIOVASCULAR_SCHEMA.len();
        let mut mean = vec![0.0; n];
        let mut scale = vec![1.0; n];
        mean[4] = 1.0; // exercise_habits
        scale[4] = 0.5;
        let artifact = PreprocessorArtifact {
            columns: CARDIOVASCULAR_SCHEMA.feature_names().map(String::from).collect(),
            mean,
            scale,
            categories,
        };
        let pre = Preprocessor::from_artifact(&CARDIOVASCULAR_SCHEMA, artifact, "test").unwrap();
        let matrix = pre.transform(&cardio_input()).unwrap();

        assert_eq!(matrix.ncols(), 20);
        // fitted levels ["High", "Low", "Medium"]: "low" -> 1, then (1 - 1) / 0.5
        assert_eq!(matrix.row()[4], 0.0);
        // gender fitted ["Female", "Male"]: Male -> 1
        assert_eq!(matrix.row()[1], 1.0);
        assert_eq!(
            matrix.raw_values()[4],
            RawValue::Category("Low".to_string())
        );
    }

    #[test]
    fn missing_feature_is_a_schema_error() {
        let pre = Preprocessor::passthrough(&CARDIOVASCULAR_SCHEMA);
        let mut input = cardio_input();
        input.remove("age");
        let err = pre.transform(&input).unwrap_err();
        assert!(matches!(
            err,
            XdocError::Schema(SchemaViolation::Missing(ref f)) if f == "age"
        ));

        let mut input = cardio_input();
        input.insert("bmi".into(), Value::Null);
        assert!(matches!(
            pre.transform(&input),
            Err(XdocError::Schema(SchemaViolation::Missing(_)))
        ));
    }

    #[test]
    fn uncoercible_values_are_type_errors() {
        let pre = Preprocessor::passthrough(&DIABETES_SCHEMA);

        let mut input = diabetes_input();
        input.insert("HbA1c".into(), json!("high"));
        assert!(matches!(
            pre.transform(&input),
            Err(XdocError::Type { ref feature, .. }) if feature == "HbA1c"
        ));

        let mut input = diabetes_input();
        input.insert("BMI".into(), json!(true));
        assert!(matches!(pre.transform(&input), Err(XdocError::Type { .. })));

        let mut input = diabetes_input();
        input.insert("AGE".into(), json!(" 45 "));
        assert!(pre.transform(&input).is_ok());
    }

    #[test]
    fn domain_and_positivity_are_enforced() {
        let pre = Preprocessor::passthrough(&CARDIOVASCULAR_SCHEMA);

        let mut input = cardio_input();
        input.insert("smoking".into(), json!("Sometimes"));
        assert!(matches!(
            pre.transform(&input),
            Err(XdocError::Schema(SchemaViolation::OutOfDomain { .. }))
        ));

        let mut input = cardio_input();
        input.insert("blood_pressure".into(), json!(-5));
        assert!(matches!(
            pre.transform(&input),
            Err(XdocError::Schema(SchemaViolation::Constraint { .. }))
        ));

        let mut input = cardio_input();
        input.insert("sleep_hours".into(), json!(0));
        assert!(pre.transform(&input).is_ok());
    }

    #[test]
    fn artifact_with_wrong_column_order_is_rejected() {
        let mut artifact = diabetes_artifact();
        artifact.columns.swap(0, 1);
        let err = Preprocessor::from_artifact(&DIABETES_SCHEMA, artifact, "scaler.json")
            .unwrap_err();
        assert!(matches!(err, XdocError::Artifact { ref path, .. } if path == "scaler.json"));
    }

    #[test]
    fn artifact_missing_categories_is_rejected() {
        let n = CARDIOVASCULAR_SCHEMA.len();
        let artifact = PreprocessorArtifact {
            columns: CARDIOVASCULAR_SCHEMA.feature_names().map(String::from).collect(),
            mean: vec![0.0; n],
            scale: vec![1.0; n],
            categories: BTreeMap::new(),
        };
        assert!(Preprocessor::from_artifact(&CARDIOVASCULAR_SCHEMA, artifact, "x").is_err());
    }
}
