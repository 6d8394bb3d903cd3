use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model::GradientBoostedModel;

/// Class probabilities for one input row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probabilities(Vec<f64>);

impl Probabilities {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Index of the largest probability; the first one wins ties.
    pub fn predicted_class(&self) -> usize {
        let mut best = 0;
        for (idx, p) in self.0.iter().enumerate().skip(1) {
            if *p > self.0[best] {
                best = idx;
            }
        }
        best
    }

    pub fn confidence(&self) -> f64 {
        self.0.get(self.predicted_class()).copied().unwrap_or(0.0)
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.0
    }
}

/// Read-only handle on a loaded classifier.
#[derive(Debug, Clone)]
pub struct Scorer {
    model: Arc<GradientBoostedModel>,
}

impl Scorer {
    pub fn new(model: GradientBoostedModel) -> Self {
        Self {
            model: Arc::new(model),
        }
    }

    pub fn model(&self) -> &GradientBoostedModel {
        &self.model
    }

    pub fn version(&self) -> &str {
        self.model.version()
    }

    pub fn score(&self, row: ArrayView1<'_, f64>) -> Probabilities {
        Probabilities::new(self.model.predict_proba(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_maximum_wins_ties() {
        let p = Probabilities::new(vec![0.4, 0.4, 0.2]);
        assert_eq!(p.predicted_class(), 0);
        assert_eq!(p.confidence(), 0.4);

        let p = Probabilities::new(vec![0.1, 0.07, 0.83]);
        assert_eq!(p.predicted_class(), 2);
        assert_eq!(p.confidence(), 0.83);
    }
}
