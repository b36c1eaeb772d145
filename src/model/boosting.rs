//! Gradient boosting over regression trees, squared-error loss.
//!
//! The ensemble starts from the target mean and adds shallow trees fitted
//! to the running residuals, each scaled by the learning rate. With
//! `subsample < 1.0` every stage trains on a seeded row sample, so the same
//! hyperparameters always produce the same model.

use rand::rngs::SmallRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{RecastError, Result};
use crate::model::tree::RegressionTree;
use crate::model::{Hyperparameters, ModelBackend};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    hp: Hyperparameters,
    base: Option<f64>,
    trees: Vec<RegressionTree>,
}

impl GradientBoosting {
    pub fn new(hp: Hyperparameters) -> Self {
        Self {
            hp,
            base: None,
            trees: Vec::new(),
        }
    }

    fn stage_indices(&self, rng: &mut SmallRng, n: usize) -> Vec<usize> {
        if self.hp.subsample >= 1.0 {
            return (0..n).collect();
        }
        let amount = ((n as f64 * self.hp.subsample).floor() as usize).max(1);
        sample(rng, n, amount).into_vec()
    }
}

impl ModelBackend for GradientBoosting {
    fn fit(&mut self, features: &[Vec<f64>], target: &[f64]) -> Result<()> {
        if features.is_empty() {
            return Err(RecastError::Validation(
                "cannot fit gradient boosting on zero rows".to_string(),
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
        let base = target.iter().sum::<f64>() / n as f64;
        let mut residuals: Vec<f64> = target.iter().map(|&y| y - base).collect();
        let mut rng = SmallRng::seed_from_u64(self.hp.seed);

        self.trees.clear();
        self.trees.reserve(self.hp.n_estimators);
        for _ in 0..self.hp.n_estimators {
            let indices = self.stage_indices(&mut rng, n);
            let mut tree = RegressionTree::from_hyperparameters(&self.hp);
            tree.fit_indices(features, &residuals, &indices)?;
            for (row, r) in features.iter().zip(residuals.iter_mut()) {
                *r -= self.hp.learning_rate * tree.predict_row(row);
            }
            self.trees.push(tree);
        }
        self.base = Some(base);
        Ok(())
    }

    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>> {
        let base = self.base.ok_or_else(|| {
            RecastError::Internal("gradient boosting backend used before fit".to_string())
        })?;
        Ok(features
            .iter()
            .map(|row| {
                let boost: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
                base + self.hp.learning_rate * boost
            })
            .collect())
    }

    fn to_artifact(&self) -> Result<serde_json::Value> {
        let base = self.base.ok_or_else(|| {
            RecastError::Internal("gradient boosting backend exported before fit".to_string())
        })?;
        Ok(serde_json::json!({
            "model_type": "gradient_boosting",
            "hyperparameters": serde_json::to_value(self.hp)?,
            "base_prediction": base,
            "trees": serde_json::to_value(&self.trees)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..20).map(|i| (i as f64) * 2.0 + 1.0).collect();
        (x, y)
    }

    #[test]
    fn drives_training_error_down() {
        let (x, y) = toy_data();
        let hp = Hyperparameters {
            n_estimators: 200,
            max_depth: 3,
            learning_rate: 0.1,
            ..Default::default()
        };
        let mut model = GradientBoosting::new(hp);
        model.fit(&x, &y).unwrap();
        let preds = model.predict(&x).unwrap();
        let max_err = preds
            .iter()
            .zip(y.iter())
            .map(|(p, t)| (p - t).abs())
            .fold(0.0_f64, f64::max);
        assert!(max_err < 0.1, "max training error {max_err}");
    }

    #[test]
    fn same_seed_same_predictions() {
        let (x, y) = toy_data();
        let hp = Hyperparameters {
            n_estimators: 50,
            subsample: 0.7,
            seed: 9,
            ..Default::default()
        };
        let mut a = GradientBoosting::new(hp);
        let mut b = GradientBoosting::new(hp);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn predict_before_fit_is_internal_error() {
        let model = GradientBoosting::new(Hyperparameters::default());
        assert!(matches!(
            model.predict(&[vec![1.0]]).unwrap_err(),
            RecastError::Internal(_)
        ));
    }

    #[test]
    fn artifact_carries_family_tag() {
        let (x, y) = toy_data();
        let hp = Hyperparameters {
            n_estimators: 5,
            ..Default::default()
        };
        let mut model = GradientBoosting::new(hp);
        model.fit(&x, &y).unwrap();
        let artifact = model.to_artifact().unwrap();
        assert_eq!(artifact["model_type"], "gradient_boosting");
        assert_eq!(artifact["trees"].as_array().unwrap().len(), 5);
    }
}
