use ndarray::ArrayView1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        /// Branch taken when the feature value is missing (NaN).
        default_left: bool,
    },
}

/// A tree node and the training cover (sum of hessians) that reached it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub cover: f64,
}

impl Node {
    pub fn leaf(value: f64, cover: f64) -> Self {
        Self {
            kind: NodeKind::Leaf { value },
            cover,
        }
    }

    pub fn split(feature: usize, threshold: f64, left: usize, right: usize, cover: f64) -> Self {
        Self {
            kind: NodeKind::Split {
                feature,
                threshold,
                left,
                right,
                default_left: true,
            },
            cover,
        }
    }
}

/// A single regression tree stored as a flat node array, root at index 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Validates the node layout. Children must point forward so every walk
    /// terminates.
    pub fn new(nodes: Vec<Node>) -> Result<Self, String> {
        if nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (idx, node) in nodes.iter().enumerate() {
            if !node.cover.is_finite() || node.cover < 0.0 {
                return Err(format!("node {idx} has invalid cover {}", node.cover));
            }
            match node.kind {
                NodeKind::Leaf { value } if !value.is_finite() => {
                    return Err(format!("leaf {idx} has non-finite value"));
                }
                NodeKind::Leaf { .. } => {}
                NodeKind::Split {
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    if left <= idx || right <= idx || left >= nodes.len() || right >= nodes.len()
                    {
                        return Err(format!(
                            "split {idx} has invalid children ({left}, {right})"
                        ));
                    }
                    if left == right {
                        return Err(format!("split {idx} has identical children"));
                    }
                    if node.cover <= 0.0 {
                        return Err(format!("split {idx} has zero cover"));
                    }
                    if threshold.is_nan() {
                        return Err(format!("split {idx} has NaN threshold"));
                    }
                }
            }
        }
        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn max_feature(&self) -> Option<usize> {
        self.nodes
            .iter()
            .filter_map(|n| match n.kind {
                NodeKind::Split { feature, .. } => Some(feature),
                NodeKind::Leaf { .. } => None,
            })
            .max()
    }

    /// Child followed by `x` at split node `idx`: `x < threshold` goes left.
    pub(crate) fn hot_child(&self, idx: usize, x: ArrayView1<'_, f64>) -> Option<usize> {
        match self.nodes[idx].kind {
            NodeKind::Leaf { .. } => None,
            NodeKind::Split {
                feature,
                threshold,
                left,
                right,
                default_left,
            } => {
                let value = x[feature];
                let go_left = if value.is_nan() {
                    default_left
                } else {
                    value < threshold
                };
                Some(if go_left { left } else { right })
            }
        }
    }

    pub fn predict(&self, x: ArrayView1<'_, f64>) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx].kind {
                NodeKind::Leaf { value } => return value,
                NodeKind::Split { .. } => {
                    idx = match self.hot_child(idx, x) {
                        Some(next) => next,
                        None => return 0.0,
                    }
                }
            }
        }
    }

    /// Cover-weighted mean leaf value, i.e. the tree's output with no feature known.
    pub fn expected_value(&self) -> f64 {
        self.expected_from(0)
    }

    fn expected_from(&self, idx: usize) -> f64 {
        let node = &self.nodes[idx];
        match node.kind {
            NodeKind::Leaf { value } => value,
            NodeKind::Split { left, right, .. } => {
                let l = &self.nodes[left];
                let r = &self.nodes[right];
                (l.cover * self.expected_from(left) + r.cover * self.expected_from(right))
                    / node.cover
            }
        }
    }
}
