//! Gradient-boosted tree ensembles: evaluation and exact attribution.

pub mod shap;
pub mod tree;
pub mod xgboost;

use ndarray::ArrayView1;

pub use tree::{Node, NodeKind, Tree};

use crate::error::{Result, XdocError};

/// Link between the summed tree margins and class probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    /// One output group; `p(class 1) = sigmoid(margin)`.
    BinaryLogistic,
    /// One output group per class; probabilities are the softmax of the margins.
    MultiSoftprob { num_class: usize },
}

impl Objective {
    pub fn num_groups(&self) -> usize {
        match self {
            Objective::BinaryLogistic => 1,
            Objective::MultiSoftprob { num_class } => *num_class,
        }
    }

    pub fn num_classes(&self) -> usize {
        match self {
            Objective::BinaryLogistic => 2,
            Objective::MultiSoftprob { num_class } => *num_class,
        }
    }
}

/// Per-feature attribution of one class margin, plus the margin it explains.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassAttribution {
    pub class: usize,
    /// Expected margin with no feature known.
    pub base_value: f64,
    /// One value per feature, in input column order.
    pub values: Vec<f64>,
    /// Margin of `class` at the explained input.
    pub margin: f64,
}

#[derive(Debug, Clone)]
pub struct GradientBoostedModel {
    objective: Objective,
    base_margin: f64,
    num_features: usize,
    trees: Vec<Tree>,
    /// Output group of each tree.
    groups: Vec<usize>,
    version: String,
}

impl GradientBoostedModel {
    pub fn new(
        objective: Objective,
        base_margin: f64,
        num_features: usize,
        trees: Vec<(usize, Tree)>,
    ) -> Result<Self> {
        Self::build(objective, base_margin, num_features, trees)
            .map_err(|reason| XdocError::artifact("in-memory model", reason))
    }

    pub(crate) fn build(
        objective: Objective,
        base_margin: f64,
        num_features: usize,
        trees: Vec<(usize, Tree)>,
    ) -> std::result::Result<Self, String> {
        if objective.num_classes() < 2 {
            return Err(format!("{} classes is not a classifier", objective.num_classes()));
        }
        if !base_margin.is_finite() {
            return Err("base margin is not finite".to_string());
        }
        let num_groups = objective.num_groups();
        let mut groups = Vec::with_capacity(trees.len());
        let mut kept = Vec::with_capacity(trees.len());
        for (idx, (group, tree)) in trees.into_iter().enumerate() {
            if group >= num_groups {
                return Err(format!(
                    "tree {idx} belongs to group {group} but the model has {num_groups}"
                ));
            }
            if let Some(feature) = tree.max_feature() {
                if feature >= num_features {
                    return Err(format!(
                        "tree {idx} splits on feature {feature}, model has {num_features}"
                    ));
                }
            }
            groups.push(group);
            kept.push(tree);
        }
        Ok(Self {
            objective,
            base_margin,
            num_features,
            trees: kept,
            groups,
            version: String::from("unversioned"),
        })
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_classes(&self) -> usize {
        self.objective.num_classes()
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn group_trees(&self, group: usize) -> impl Iterator<Item = &Tree> + '_ {
        self.trees
            .iter()
            .zip(self.groups.iter())
            .filter(move |(_, g)| **g == group)
            .map(|(t, _)| t)
    }

    /// Raw margin of each output group.
    pub fn margins(&self, x: ArrayView1<'_, f64>) -> Vec<f64> {
        let mut margins = vec![self.base_margin; self.objective.num_groups()];
        for (tree, group) in self.trees.iter().zip(self.groups.iter()) {
            margins[*group] += tree.predict(x);
        }
        margins
    }

    /// Class probabilities; always `num_classes` entries summing to 1.
    pub fn predict_proba(&self, x: ArrayView1<'_, f64>) -> Vec<f64> {
        let margins = self.margins(x);
        match self.objective {
            Objective::BinaryLogistic => {
                let p = sigmoid(margins[0]);
                vec![1.0 - p, p]
            }
            Objective::MultiSoftprob { .. } => softmax(&margins),
        }
    }

    /// Exact TreeSHAP values of `class`'s margin at `x`.
    ///
    /// Binary models have a single margin, the log-odds of class 1; the
    /// attribution of class 0 is its negation.
    pub fn attribute(&self, x: ArrayView1<'_, f64>, class: usize) -> Result<ClassAttribution> {
        if class >= self.num_classes() {
            return Err(XdocError::artifact(
                &self.version,
                format!("class {class} is outside the model's {} classes", self.num_classes()),
            ));
        }
        let (group, sign) = match self.objective {
            Objective::BinaryLogistic => (0, if class == 1 { 1.0 } else { -1.0 }),
            Objective::MultiSoftprob { .. } => (class, 1.0),
        };

        let mut phi = vec![0.0; self.num_features];
        let mut base_value = self.base_margin;
        let mut margin = self.base_margin;
        for tree in self.group_trees(group) {
            shap::tree_shap(tree, x, &mut phi);
            base_value += tree.expected_value();
            margin += tree.predict(x);
        }

        Ok(ClassAttribution {
            class,
            base_value: sign * base_value,
            values: phi.into_iter().map(|v| sign * v).collect(),
            margin: sign * margin,
        })
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn softmax(margins: &[f64]) -> Vec<f64> {
    let max = margins.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = margins.iter().map(|m| (m - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn stump(feature: usize, threshold: f64, low: f64, high: f64) -> Tree {
        Tree::new(vec![
            Node::split(feature, threshold, 1, 2, 10.0),
            Node::leaf(low, 5.0),
            Node::leaf(high, 5.0),
        ])
        .unwrap()
    }

    #[test]
    fn binary_probabilities_and_class_zero_attribution() {
        let model = GradientBoostedModel::new(
            Objective::BinaryLogistic,
            0.0,
            2,
            vec![(0, stump(0, 0.5, -1.0, 1.0)), (0, stump(1, 0.5, -0.5, 0.5))],
        )
        .unwrap();
        let x = array![1.0, 0.0];

        let proba = model.predict_proba(x.view());
        assert_eq!(proba.len(), 2);
        assert!((proba[1] - sigmoid(0.5)).abs() < 1e-12);
        assert!((proba.iter().sum::<f64>() - 1.0).abs() < 1e-12);

        let one = model.attribute(x.view(), 1).unwrap();
        let zero = model.attribute(x.view(), 0).unwrap();
        assert!((one.values[0] - 1.0).abs() < 1e-12);
        assert!((one.values[1] + 0.5).abs() < 1e-12);
        assert_eq!(zero.values, vec![-one.values[0], -one.values[1]]);
        assert!((zero.base_value + zero.values.iter().sum::<f64>() - zero.margin).abs() < 1e-12);
    }

    #[test]
    fn multiclass_attribution_uses_the_requested_group() {
        let model = GradientBoostedModel::new(
            Objective::MultiSoftprob { num_class: 3 },
            0.5,
            2,
            vec![
                (0, stump(0, 0.5, 0.2, -0.2)),
                (1, stump(1, 0.5, 0.0, 0.3)),
                (2, stump(0, 0.5, -1.0, 2.0)),
            ],
        )
        .unwrap();
        let x = array![1.0, 1.0];

        let proba = model.predict_proba(x.view());
        assert_eq!(proba.len(), 3);
        assert!((proba.iter().sum::<f64>() - 1.0).abs() < 1e-12);

        let attr = model.attribute(x.view(), 2).unwrap();
        assert!((attr.values[0] - 1.5).abs() < 1e-12);
        assert_eq!(attr.values[1], 0.0);
        assert!((attr.margin - 2.5).abs() < 1e-12);
        assert!((attr.base_value + attr.values.iter().sum::<f64>() - attr.margin).abs() < 1e-12);

        assert!(model.attribute(x.view(), 3).is_err());
    }

    #[test]
    fn trees_outside_the_feature_space_are_rejected() {
        let err = GradientBoostedModel::new(
            Objective::BinaryLogistic,
            0.0,
            1,
            vec![(0, stump(3, 0.5, 0.0, 1.0))],
        );
        assert!(err.is_err());

        let err = GradientBoostedModel::new(
            Objective::MultiSoftprob { num_class: 2 },
            0.0,
            1,
            vec![(2, stump(0, 0.5, 0.0, 1.0))],
        );
        assert!(err.is_err());
    }
}
