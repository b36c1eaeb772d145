//! Regression tree grown by greedy variance reduction.
//!
//! The tree is the shared building block of the boosting and forest
//! backends. Nodes live in a flat vec; child links are indices, which keeps
//! the fitted state trivially serializable.

use serde::{Deserialize, Serialize};

use crate::error::{RecastError, Result};
use crate::model::{Hyperparameters, ModelBackend};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A single regression tree. Splits minimize the summed squared error of
/// the two children; rows with a feature value `<= threshold` go left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    max_depth: usize,
    min_samples_split: usize,
    min_samples_leaf: usize,
    nodes: Vec<Node>,
}

impl RegressionTree {
    pub fn new(max_depth: usize, min_samples_split: usize, min_samples_leaf: usize) -> Self {
        Self {
            max_depth,
            min_samples_split,
            min_samples_leaf,
            nodes: Vec::new(),
        }
    }

    pub fn from_hyperparameters(hp: &Hyperparameters) -> Self {
        Self::new(hp.max_depth, hp.min_samples_split, hp.min_samples_leaf)
    }

    /// Fit on a subset of rows given by `indices`. The boosting and forest
    /// backends use this to train on residuals and bootstrap samples
    /// without copying the matrix.
    pub(super) fn fit_indices(
        &mut self,
        features: &[Vec<f64>],
        target: &[f64],
        indices: &[usize],
    ) -> Result<()> {
        if indices.is_empty() {
            return Err(RecastError::Validation(
                "cannot fit a tree on zero rows".to_string(),
            ));
        }
        self.nodes.clear();
        let mut scratch = indices.to_vec();
        self.build(features, target, &mut scratch, 0);
        Ok(())
    }

    /// Grow a subtree over `indices`, returning its node id.
    fn build(
        &mut self,
        features: &[Vec<f64>],
        target: &[f64],
        indices: &mut [usize],
        depth: usize,
    ) -> usize {
        let n = indices.len();
        let mean = indices.iter().map(|&i| target[i]).sum::<f64>() / n as f64;

        if depth >= self.max_depth || n < self.min_samples_split {
            return self.push(Node::Leaf { value: mean });
        }
        let Some((feature, threshold)) = self.best_split(features, target, indices) else {
            return self.push(Node::Leaf { value: mean });
        };

        // Partition in place: left rows first.
        let mut mid = 0;
        for i in 0..n {
            if features[indices[i]][feature] <= threshold {
                indices.swap(i, mid);
                mid += 1;
            }
        }

        let id = self.push(Node::Leaf { value: mean });
        let (left_idx, right_idx) = indices.split_at_mut(mid);
        let left = self.build(features, target, left_idx, depth + 1);
        let right = self.build(features, target, right_idx, depth + 1);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Best (feature, threshold) by summed child squared error, or `None`
    /// when no split satisfies the leaf-size constraint or improves on the
    /// parent.
    fn best_split(
        &self,
        features: &[Vec<f64>],
        target: &[f64],
        indices: &[usize],
    ) -> Option<(usize, f64)> {
        let n = indices.len();
        let n_features = features[indices[0]].len();

        let sum: f64 = indices.iter().map(|&i| target[i]).sum();
        let sq_sum: f64 = indices.iter().map(|&i| target[i] * target[i]).sum();
        let parent_sse = sq_sum - sum * sum / n as f64;

        let mut best: Option<(usize, f64, f64)> = None;
        let mut sorted = indices.to_vec();
        for f in 0..n_features {
            sorted.sort_by(|&a, &b| {
                features[a][f]
                    .partial_cmp(&features[b][f])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for pos in 1..n {
                let prev = sorted[pos - 1];
                left_sum += target[prev];
                left_sq += target[prev] * target[prev];

                if pos < self.min_samples_leaf || n - pos < self.min_samples_leaf {
                    continue;
                }
                let lo = features[prev][f];
                let hi = features[sorted[pos]][f];
                if lo == hi {
                    continue;
                }

                let right_sum = sum - left_sum;
                let right_sq = sq_sum - left_sq;
                let left_sse = left_sq - left_sum * left_sum / pos as f64;
                let right_sse = right_sq - right_sum * right_sum / (n - pos) as f64;
                let sse = left_sse + right_sse;
                if best.map_or(sse < parent_sse - 1e-12, |(_, _, b)| sse < b) {
                    best = Some((f, (lo + hi) / 2.0, sse));
                }
            }
        }
        best.map(|(f, t, _)| (f, t))
    }

    /// Predict one row by walking from the root.
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    fn is_fitted(&self) -> bool {
        !self.nodes.is_empty()
    }
}

impl ModelBackend for RegressionTree {
    fn fit(&mut self, features: &[Vec<f64>], target: &[f64]) -> Result<()> {
        if features.len() != target.len() {
            return Err(RecastError::Validation(format!(
                "feature rows {} != target rows {}",
                features.len(),
                target.len()
            )));
        }
        let indices: Vec<usize> = (0..features.len()).collect();
        self.fit_indices(features, target, &indices)
    }

    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>> {
        if !self.is_fitted() {
            return Err(RecastError::Internal(
                "regression tree used before fit".to_string(),
            ));
        }
        Ok(features.iter().map(|row| self.predict_row(row)).collect())
    }

    fn to_artifact(&self) -> Result<serde_json::Value> {
        if !self.is_fitted() {
            return Err(RecastError::Internal(
                "regression tree exported before fit".to_string(),
            ));
        }
        Ok(serde_json::json!({
            "model_type": "regression_tree",
            "max_depth": self.max_depth,
            "min_samples_split": self.min_samples_split,
            "min_samples_leaf": self.min_samples_leaf,
            "nodes": serde_json::to_value(&self.nodes)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(values: &[f64]) -> Vec<Vec<f64>> {
        values.iter().map(|&v| vec![v]).collect()
    }

    #[test]
    fn depth_one_recovers_step_function() {
        let x = column(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let y: Vec<f64> = (0..10).map(|i| if i < 5 { 0.0 } else { 10.0 }).collect();
        let mut tree = RegressionTree::new(1, 2, 1);
        tree.fit(&x, &y).unwrap();
        let preds = tree.predict(&x).unwrap();
        assert_eq!(preds, y);
    }

    #[test]
    fn leaf_size_constraint_blocks_small_splits() {
        let x = column(&[0.0, 1.0, 2.0, 3.0]);
        let y = vec![0.0, 0.0, 10.0, 10.0];

        // min_samples_leaf = 2 still allows the 2/2 split.
        let mut tree = RegressionTree::new(3, 2, 2);
        tree.fit(&x, &y).unwrap();
        assert_eq!(tree.predict(&x).unwrap(), y);

        // min_samples_leaf = 3 cannot be satisfied on 4 rows: single leaf.
        let mut stump = RegressionTree::new(3, 2, 3);
        stump.fit(&x, &y).unwrap();
        assert!(stump
            .predict(&x)
            .unwrap()
            .iter()
            .all(|&p| (p - 5.0).abs() < 1e-12));
    }

    #[test]
    fn constant_target_yields_single_leaf() {
        let x = column(&[1.0, 2.0, 3.0]);
        let y = vec![7.0, 7.0, 7.0];
        let mut tree = RegressionTree::new(4, 2, 1);
        tree.fit(&x, &y).unwrap();
        assert!(tree.predict(&x).unwrap().iter().all(|&p| p == 7.0));
    }

    #[test]
    fn predict_before_fit_is_internal_error() {
        let tree = RegressionTree::new(3, 2, 1);
        let err = tree.predict(&[vec![1.0]]).unwrap_err();
        assert!(matches!(err, RecastError::Internal(_)));
    }

    #[test]
    fn mismatched_rows_rejected() {
        let mut tree = RegressionTree::new(3, 2, 1);
        let err = tree.fit(&[vec![1.0]], &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, RecastError::Validation(_)));
    }
}
