//! Exact path-dependent TreeSHAP (Lundberg, Erion & Lee, 2018, Algorithm 2).
//!
//! For each tree the recursion tracks the unique path of split features from
//! the root, the fraction of "zero" (feature unknown, follow training cover)
//! and "one" (feature known, follow `x`) paths flowing into each element, and
//! the permutation weights needed to turn them into Shapley values.

use ndarray::ArrayView1;

use super::tree::{NodeKind, Tree};

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

/// Adds the SHAP values of `tree` at `x` into `phi` (one slot per feature).
pub fn tree_shap(tree: &Tree, x: ArrayView1<'_, f64>, phi: &mut [f64]) {
    recurse(tree, x, phi, 0, Vec::new(), 1.0, 1.0, None);
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    tree: &Tree,
    x: ArrayView1<'_, f64>,
    phi: &mut [f64],
    node_idx: usize,
    mut path: Vec<PathElement>,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    extend_path(&mut path, zero_fraction, one_fraction, feature);

    let node = tree.nodes()[node_idx];
    match node.kind {
        NodeKind::Leaf { value } => {
            for i in 1..path.len() {
                let w = unwound_path_sum(&path, i);
                let el = path[i];
                if let Some(f) = el.feature {
                    phi[f] += w * (el.one_fraction - el.zero_fraction) * value;
                }
            }
        }
        NodeKind::Split {
            feature: split,
            left,
            right,
            ..
        } => {
            let Some(hot) = tree.hot_child(node_idx, x) else {
                return;
            };
            let cold = if hot == left { right } else { left };
            let hot_zero = tree.nodes()[hot].cover / node.cover;
            let cold_zero = tree.nodes()[cold].cover / node.cover;

            // A feature split on twice along the path is undone and redone here.
            let mut incoming_zero = 1.0;
            let mut incoming_one = 1.0;
            if let Some(k) = path.iter().position(|e| e.feature == Some(split)) {
                incoming_zero = path[k].zero_fraction;
                incoming_one = path[k].one_fraction;
                unwind_path(&mut path, k);
            }

            recurse(
                tree,
                x,
                phi,
                hot,
                path.clone(),
                hot_zero * incoming_zero,
                incoming_one,
                Some(split),
            );
            recurse(
                tree,
                x,
                phi,
                cold,
                path,
                cold_zero * incoming_zero,
                0.0,
                Some(split),
            );
        }
    }
}

fn extend_path(path: &mut Vec<PathElement>, zero: f64, one: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction: zero,
        one_fraction: one,
        weight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].weight += one * path[i].weight * (i + 1) as f64 / denom;
        path[i].weight = zero * path[i].weight * (depth - i) as f64 / denom;
    }
}

fn unwind_path(path: &mut Vec<PathElement>, k: usize) {
    let depth = path.len() - 1;
    let one = path[k].one_fraction;
    let zero = path[k].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one = path[depth].weight;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = path[i].weight;
            path[i].weight = next_one * denom / ((i + 1) as f64 * one);
            next_one = tmp - path[i].weight * zero * (depth - i) as f64 / denom;
        } else {
            path[i].weight = path[i].weight * denom / (zero * (depth - i) as f64);
        }
    }

    for i in k..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

/// Total permutation weight of the path with element `k` removed.
fn unwound_path_sum(path: &[PathElement], k: usize) -> f64 {
    let depth = path.len() - 1;
    let one = path[k].one_fraction;
    let zero = path[k].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one = path[depth].weight;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = next_one * denom / ((i + 1) as f64 * one);
            total += tmp;
            next_one = path[i].weight - tmp * zero * ((depth - i) as f64 / denom);
        } else if zero != 0.0 {
            total += (path[i].weight / zero) / ((depth - i) as f64 / denom);
        }
    }
    total
}
