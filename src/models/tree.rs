//! Arena-backed binary decision tree shared by the forest and leaf-wise learners.

use serde::{Deserialize, Serialize};

/// One node of a tree. Children are indices into `Tree::nodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node<V> {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: V,
    },
}

/// Binary tree with its root at index 0. Rows with `x[feature] <= threshold` go left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree<V> {
    pub nodes: Vec<Node<V>>,
}

impl<V> Tree<V> {
    pub fn leaf(value: V) -> Self {
        Self {
            nodes: vec![Node::Leaf { value }],
        }
    }

    /// Leaf value reached by `row`.
    pub fn leaf_for(&self, row: &[f64]) -> &V {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
                Node::Leaf { value } => return value,
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    /// Check that every child index points at a later node and every node is reachable once.
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        let mut seen = vec![false; self.nodes.len()];
        seen[0] = true;
        for (i, node) in self.nodes.iter().enumerate() {
            if let Node::Split { left, right, .. } = node {
                for child in [*left, *right] {
                    if child <= i || child >= self.nodes.len() {
                        return Err(format!("node {i} has invalid child {child}"));
                    }
                    if seen[child] {
                        return Err(format!("node {child} has more than one parent"));
                    }
                    seen[child] = true;
                }
            }
        }
        if let Some(orphan) = seen.iter().position(|s| !s) {
            return Err(format!("node {orphan} is unreachable"));
        }
        Ok(())
    }

    /// `validate` plus every split feature below `n_features`.
    pub fn validate_for(&self, n_features: usize) -> Result<(), String> {
        self.validate()?;
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split { feature, .. } if *feature >= n_features => {
                    return Err(format!("node {i} splits on feature {feature} of {n_features}"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump() -> Tree<f64> {
        Tree {
            nodes: vec![
                Node::Split {
                    feature: 1,
                    threshold: 0.5,
                    left: 1,
                    right: 2,
                },
                Node::Leaf { value: -1.0 },
                Node::Leaf { value: 1.0 },
            ],
        }
    }

    #[test]
    fn routes_on_threshold() {
        let tree = stump();
        assert_eq!(*tree.leaf_for(&[9.0, 0.5]), -1.0);
        assert_eq!(*tree.leaf_for(&[9.0, 0.6]), 1.0);
        assert_eq!(tree.n_leaves(), 2);
        tree.validate().unwrap();
    }

    #[test]
    fn rejects_cycles_and_orphans() {
        let mut tree = stump();
        tree.nodes[0] = Node::Split {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 2,
        };
        assert!(tree.validate().is_err());

        let orphan = Tree {
            nodes: vec![Node::Leaf { value: 0.0 }, Node::Leaf { value: 1.0 }],
        };
        assert!(orphan.validate().is_err());
    }
}
