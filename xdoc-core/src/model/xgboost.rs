//! Import of XGBoost's JSON model format (`Booster.save_model("model.json")`).
//!
//! Only `gbtree` boosters with numerical splits and the `binary:logistic`,
//! `multi:softprob` and `multi:softmax` objectives are accepted. Leaf values
//! are stored in `split_conditions`; node covers come from `sum_hessian`.

use serde::Deserialize;
use std::path::Path;
use tracing::info;

use super::{GradientBoostedModel, Node, Objective, Tree};
use crate::error::{Result, XdocError};

#[derive(Debug, Deserialize)]
struct XgbDocument {
    learner: Learner,
    #[serde(default)]
    version: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct Learner {
    #[serde(default)]
    feature_names: Vec<String>,
    gradient_booster: GradientBooster,
    learner_model_param: LearnerModelParam,
    objective: ObjectiveParam,
}

#[derive(Debug, Deserialize)]
struct GradientBooster {
    name: String,
    model: Option<GbTreeModel>,
}

#[derive(Debug, Deserialize)]
struct GbTreeModel {
    trees: Vec<XgbTree>,
    tree_info: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct XgbTree {
    left_children: Vec<i64>,
    right_children: Vec<i64>,
    split_indices: Vec<usize>,
    split_conditions: Vec<f64>,
    default_left: Vec<Flag>,
    sum_hessian: Vec<f64>,
    #[serde(default)]
    split_type: Vec<u8>,
}

/// `default_left` is written as booleans by old releases and as 0/1 by new ones.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(u8),
}

impl Flag {
    fn is_set(self) -> bool {
        match self {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LearnerModelParam {
    base_score: String,
    #[serde(default)]
    num_class: Option<String>,
    #[serde(default)]
    num_feature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectiveParam {
    name: String,
}

/// An imported model and the feature names it was trained with (may be empty).
#[derive(Debug, Clone)]
pub struct ImportedModel {
    pub model: GradientBoostedModel,
    pub feature_names: Vec<String>,
}

pub fn load(path: &Path) -> Result<ImportedModel> {
    let source = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|e| XdocError::artifact(&source, e.to_string()))?;
    let version = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.clone());
    from_slice(&bytes, &source, &version)
}

pub fn from_slice(bytes: &[u8], source: &str, version: &str) -> Result<ImportedModel> {
    let doc: XgbDocument =
        serde_json::from_slice(bytes).map_err(|e| XdocError::artifact(source, e.to_string()))?;
    convert(doc, version).map_err(|reason| XdocError::artifact(source, reason))
}

/// Numeric learner params are strings, recent releases wrap them in brackets.
fn parse_param(raw: &str) -> Option<f64> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim()
        .parse()
        .ok()
}

fn convert(doc: XgbDocument, version: &str) -> std::result::Result<ImportedModel, String> {
    let learner = doc.learner;
    if learner.gradient_booster.name != "gbtree" {
        return Err(format!(
            "unsupported booster `{}`",
            learner.gradient_booster.name
        ));
    }
    let booster = learner
        .gradient_booster
        .model
        .ok_or_else(|| "gbtree model section is missing".to_string())?;

    let base_score = parse_param(&learner.learner_model_param.base_score)
        .ok_or_else(|| format!("bad base_score {:?}", learner.learner_model_param.base_score))?;
    let num_class = learner
        .learner_model_param
        .num_class
        .as_deref()
        .and_then(parse_param)
        .unwrap_or(0.0) as usize;

    let (objective, base_margin) = match learner.objective.name.as_str() {
        "binary:logistic" => {
            if !(base_score > 0.0 && base_score < 1.0) {
                return Err(format!("base_score {base_score} is not a probability"));
            }
            (
                Objective::BinaryLogistic,
                (base_score / (1.0 - base_score)).ln(),
            )
        }
        "multi:softprob" | "multi:softmax" => {
            (Objective::MultiSoftprob { num_class }, base_score)
        }
        other => return Err(format!("unsupported objective `{other}`")),
    };

    let num_features = match learner
        .learner_model_param
        .num_feature
        .as_deref()
        .and_then(parse_param)
    {
        Some(n) => n as usize,
        None if !learner.feature_names.is_empty() => learner.feature_names.len(),
        None => return Err("num_feature is missing".to_string()),
    };

    if booster.tree_info.len() != booster.trees.len() {
        return Err(format!(
            "tree_info has {} entries for {} trees",
            booster.tree_info.len(),
            booster.trees.len()
        ));
    }

    let mut trees = Vec::with_capacity(booster.trees.len());
    for (idx, (raw, group)) in booster
        .trees
        .into_iter()
        .zip(booster.tree_info)
        .enumerate()
    {
        let tree = convert_tree(raw).map_err(|e| format!("tree {idx}: {e}"))?;
        trees.push((group, tree));
    }

    let model = GradientBoostedModel::build(objective, base_margin, num_features, trees)?;
    let release = doc
        .version
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(".");
    let version = if release.is_empty() {
        version.to_string()
    } else {
        format!("{version} (xgboost {release})")
    };
    info!(
        version = %version,
        trees = model.num_trees(),
        classes = model.num_classes(),
        "imported xgboost model"
    );

    Ok(ImportedModel {
        model: model.with_version(version),
        feature_names: learner.feature_names,
    })
}

fn convert_tree(raw: XgbTree) -> std::result::Result<Tree, String> {
    let n = raw.left_children.len();
    if [
        raw.right_children.len(),
        raw.split_indices.len(),
        raw.split_conditions.len(),
        raw.default_left.len(),
        raw.sum_hessian.len(),
    ]
    .iter()
    .any(|len| *len != n)
    {
        return Err("node arrays have different lengths".to_string());
    }
    if raw.split_type.iter().any(|t| *t != 0) {
        return Err("categorical splits are not supported".to_string());
    }

    let mut nodes = Vec::with_capacity(n);
    for i in 0..n {
        let cover = raw.sum_hessian[i];
        let node = if raw.left_children[i] < 0 {
            Node::leaf(raw.split_conditions[i], cover)
        } else {
            let left = usize::try_from(raw.left_children[i]).map_err(|e| e.to_string())?;
            let right = usize::try_from(raw.right_children[i])
                .map_err(|_| format!("node {i} has a left child but no right child"))?;
            let mut node = Node::split(
                raw.split_indices[i],
                raw.split_conditions[i],
                left,
                right,
                cover,
            );
            if let super::NodeKind::Split { default_left, .. } = &mut node.kind {
                *default_left = raw.default_left[i].is_set();
            }
            node
        };
        nodes.push(node);
    }
    Tree::new(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    const BINARY: &str = r#"{
      "learner": {
        "attributes": {},
        "feature_names": ["a", "b"],
        "feature_types": ["float", "float"],
        "gradient_booster": {
          "model": {
            "gbtree_model_param": {"num_parallel_tree": "1", "num_trees": "1"},
            "tree_info": [0],
            "trees": [{
              "base_weights": [0.0, -0.4, 0.4],
              "categories": [], "categories_nodes": [], "categories_segments": [], "categories_sizes": [],
              "default_left": [1, 0, 0],
              "id": 0,
              "left_children": [1, -1, -1],
              "loss_changes": [3.0, 0.0, 0.0],
              "parents": [2147483647, 0, 0],
              "right_children": [2, -1, -1],
              "split_conditions": [1.5, -0.4, 0.4],
              "split_indices": [1, 0, 0],
              "split_type": [0, 0, 0],
              "sum_hessian": [10.0, 4.0, 6.0],
              "tree_param": {"num_deleted": "0", "num_feature": "2", "num_nodes": "3", "size_leaf_vector": "1"}
            }]
          },
          "name": "gbtree"
        },
        "learner_model_param": {"base_score": "[5E-1]", "boost_from_average": "1", "num_class": "0", "num_feature": "2", "num_target": "1"},
        "objective": {"name": "binary:logistic", "reg_loss_param": {"scale_pos_weight": "1"}}
      },
      "version": [2, 1, 0]
    }"#;

    #[test]
    fn imports_binary_logistic_model() {
        let imported = from_slice(BINARY.as_bytes(), "binary.json", "binary").unwrap();
        let model = imported.model;

        assert_eq!(imported.feature_names, vec!["a", "b"]);
        assert_eq!(model.objective(), Objective::BinaryLogistic);
        assert_eq!(model.num_features(), 2);
        assert_eq!(model.version(), "binary (xgboost 2.1.0)");

        // base_score 0.5 is a zero margin
        let proba = model.predict_proba(array![0.0, 2.0].view());
        assert!((proba[1] - 1.0 / (1.0 + (-0.4f64).exp())).abs() < 1e-12);

        // missing values follow default_left
        let proba = model.predict_proba(array![0.0, f64::NAN].view());
        assert!(proba[1] < 0.5);
    }

    #[test]
    fn imports_multiclass_tree_groups() {
        let tree = |split: f64, low: f64, high: f64| {
            format!(
                r#"{{"left_children": [1, -1, -1], "right_children": [2, -1, -1],
                    "split_indices": [0, 0, 0], "split_conditions": [{split}, {low}, {high}],
                    "default_left": [false, false, false], "sum_hessian": [3.0, 1.5, 1.5]}}"#
            )
        };
        let doc = format!(
            r#"{{"learner": {{
                "gradient_booster": {{"name": "gbtree", "model": {{
                    "tree_info": [0, 1, 2],
                    "trees": [{}, {}, {}]}}}},
                "learner_model_param": {{"base_score": "5E-1", "num_class": "3", "num_feature": "1"}},
                "objective": {{"name": "multi:softprob"}}}}}}"#,
            tree(0.5, 0.1, -0.1),
            tree(0.5, 0.0, 0.0),
            tree(0.5, -0.2, 0.9)
        );

        let model = from_slice(doc.as_bytes(), "multi.json", "multi").unwrap().model;
        assert_eq!(model.num_classes(), 3);
        let margins = model.margins(array![1.0].view());
        assert!((margins[0] - 0.4).abs() < 1e-12);
        assert!((margins[2] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn rejects_unsupported_objectives() {
        let doc = BINARY.replace("binary:logistic", "reg:squarederror");
        let err = from_slice(doc.as_bytes(), "reg.json", "reg").unwrap_err();
        assert!(err.to_string().contains("unsupported objective"));
    }

    #[test]
    fn parses_bracketed_params() {
        assert_eq!(parse_param("[5E-1]"), Some(0.5));
        assert_eq!(parse_param("3"), Some(3.0));
        assert_eq!(parse_param("n/a"), None);
    }
}
