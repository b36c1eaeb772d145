//! Linear regression via full-batch gradient descent on standardized
//! features. The scaler statistics are part of the fitted state so
//! prediction reproduces the training transform.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{RecastError, Result};
use crate::model::ModelBackend;

const ITERATIONS: usize = 500;
const STEP: f64 = 0.1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegression {
    seed: u64,
    state: Option<Fitted>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Fitted {
    weights: Vec<f64>,
    intercept: f64,
    feature_means: Vec<f64>,
    feature_stds: Vec<f64>,
}

impl LinearRegression {
    pub fn new(seed: u64) -> Self {
        Self { seed, state: None }
    }
}

fn column_stats(features: &[Vec<f64>], dim: usize) -> (Vec<f64>, Vec<f64>) {
    let n = features.len() as f64;
    let mut means = vec![0.0; dim];
    for row in features {
        for (m, v) in means.iter_mut().zip(row.iter()) {
            *m += v;
        }
    }
    for m in &mut means {
        *m /= n;
    }

    let mut stds = vec![0.0; dim];
    for row in features {
        for ((s, v), m) in stds.iter_mut().zip(row.iter()).zip(means.iter()) {
            *s += (v - m) * (v - m);
        }
    }
    for s in &mut stds {
        *s = (*s / n).sqrt();
        // Constant columns scale by 1.0 instead of dividing by zero.
        if *s == 0.0 {
            *s = 1.0;
        }
    }
    (means, stds)
}

impl ModelBackend for LinearRegression {
    fn fit(&mut self, features: &[Vec<f64>], target: &[f64]) -> Result<()> {
        if features.is_empty() {
            return Err(RecastError::Validation(
                "cannot fit linear regression on zero rows".to_string(),
            ));
        }
        if features.len() != target.len() {
            return Err(RecastError::Validation(format!(
                "feature rows {} != target rows {}",
                features.len(),
                target.len()
            )));
        }

        let n = features.len();
        let dim = features[0].len();
        let (means, stds) = column_stats(features, dim);
        let scaled: Vec<Vec<f64>> = features
            .iter()
            .map(|row| {
                row.iter()
                    .zip(means.iter().zip(stds.iter()))
                    .map(|(v, (m, s))| (v - m) / s)
                    .collect()
            })
            .collect();

        let mut rng = SmallRng::seed_from_u64(self.seed);
        let mut weights: Vec<f64> = (0..dim).map(|_| rng.gen_range(-0.01..0.01)).collect();
        let mut intercept = 0.0;

        let mut grad = vec![0.0; dim];
        for _ in 0..ITERATIONS {
            grad.iter_mut().for_each(|g| *g = 0.0);
            let mut grad_b = 0.0;
            for (row, &y) in scaled.iter().zip(target.iter()) {
                let pred: f64 =
                    intercept + weights.iter().zip(row.iter()).map(|(w, z)| w * z).sum::<f64>();
                let err = pred - y;
                for (g, z) in grad.iter_mut().zip(row.iter()) {
                    *g += err * z;
                }
                grad_b += err;
            }
            let scale = 2.0 * STEP / n as f64;
            for (w, g) in weights.iter_mut().zip(grad.iter()) {
                *w -= scale * g;
            }
            intercept -= scale * grad_b;
        }

        self.state = Some(Fitted {
            weights,
            intercept,
            feature_means: means,
            feature_stds: stds,
        });
        Ok(())
    }

    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>> {
        let fitted = self.state.as_ref().ok_or_else(|| {
            RecastError::Internal("linear regression backend used before fit".to_string())
        })?;
        Ok(features
            .iter()
            .map(|row| {
                fitted.intercept
                    + fitted
                        .weights
                        .iter()
                        .zip(row.iter())
                        .zip(fitted.feature_means.iter().zip(fitted.feature_stds.iter()))
                        .map(|((w, v), (m, s))| w * (v - m) / s)
                        .sum::<f64>()
            })
            .collect())
    }

    fn to_artifact(&self) -> Result<serde_json::Value> {
        let fitted = self.state.as_ref().ok_or_else(|| {
            RecastError::Internal("linear regression backend exported before fit".to_string())
        })?;
        Ok(serde_json::json!({
            "model_type": "linear_regression",
            "weights": fitted.weights,
            "intercept": fitted.intercept,
            "feature_means": fitted.feature_means,
            "feature_stds": fitted.feature_stds,
        }))
    }
}
