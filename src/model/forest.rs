//! Random forest regressor: bootstrap-sampled trees, averaged predictions.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{RecastError, Result};
use crate::model::tree::RegressionTree;
use crate::model::{Hyperparameters, ModelBackend};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    hp: Hyperparameters,
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn new(hp: Hyperparameters) -> Self {
        Self {
            hp,
            trees: Vec::new(),
        }
    }
}

impl ModelBackend for RandomForest {
    fn fit(&mut self, features: &[Vec<f64>], target: &[f64]) -> Result<()> {
        if features.is_empty() {
            return Err(RecastError::Validation(
                "cannot fit random forest on zero rows".to_string(),
            ));
        }
        if features.len() != target.len() {
            return Err(RecastError::Validation(format!(
                "feature rows {} != target rows {}",
                features.len(),
                target.len()
            )));
        }

        let n = target.len();
        self.trees.clear();
        self.trees.reserve(self.hp.n_estimators);
        for t in 0..self.hp.n_estimators {
            // Per-tree rng keeps each tree's sample independent of the
            // ensemble size.
            let mut rng = SmallRng::seed_from_u64(self.hp.seed.wrapping_add(t as u64));
            let indices: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut tree = RegressionTree::from_hyperparameters(&self.hp);
            tree.fit_indices(features, target, &indices)?;
            self.trees.push(tree);
        }
        Ok(())
    }

    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>> {
        if self.trees.is_empty() {
            return Err(RecastError::Internal(
                "random forest backend used before fit".to_string(),
            ));
        }
        let count = self.trees.len() as f64;
        Ok(features
            .iter()
            .map(|row| self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / count)
            .collect())
    }

    fn to_artifact(&self) -> Result<serde_json::Value> {
        if self.trees.is_empty() {
            return Err(RecastError::Internal(
                "random forest backend exported before fit".to_string(),
            ));
        }
        Ok(serde_json::json!({
            "model_type": "random_forest",
            "hyperparameters": serde_json::to_value(self.hp)?,
            "trees": serde_json::to_value(&self.trees)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..30).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..30).map(|i| if i < 15 { 1.0 } else { 5.0 }).collect();
        (x, y)
    }

    #[test]
    fn predictions_stay_within_target_range() {
        let (x, y) = toy_data();
        let hp = Hyperparameters {
            n_estimators: 25,
            max_depth: 4,
            ..Default::default()
        };
        let mut model = RandomForest::new(hp);
        model.fit(&x, &y).unwrap();
        let preds = model.predict(&x).unwrap();
        assert!(preds.iter().all(|&p| (1.0..=5.0).contains(&p)));
    }

    #[test]
    fn same_seed_same_predictions() {
        let (x, y) = toy_data();
        let hp = Hyperparameters {
            n_estimators: 10,
            seed: 17,
            ..Default::default()
        };
        let mut a = RandomForest::new(hp);
        let mut b = RandomForest::new(hp);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn predict_before_fit_is_internal_error() {
        let model = RandomForest::new(Hyperparameters::default());
        assert!(matches!(
            model.predict(&[vec![1.0]]).unwrap_err(),
            RecastError::Internal(_)
        ));
    }

    #[test]
    fn artifact_carries_family_tag() {
        let (x, y) = toy_data();
        let hp = Hyperparameters {
            n_estimators: 3,
            ..Default::default()
        };
        let mut model = RandomForest::new(hp);
        model.fit(&x, &y).unwrap();
        let artifact = model.to_artifact().unwrap();
        assert_eq!(artifact["model_type"], "random_forest");
        assert_eq!(artifact["trees"].as_array().unwrap().len(), 3);
    }
}
