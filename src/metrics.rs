//! Regression metrics for forecast evaluation.
//!
//! RMSE, MAE and R² computed over prediction/target pairs, with explicit
//! non-finite detection so a degenerate model surfaces as a failed run
//! instead of poisoning downstream comparisons.

use serde::{Deserialize, Serialize};

use crate::error::{RecastError, Result};

/// One set of regression metrics over a single partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
}

impl MetricSet {
    pub fn is_finite(&self) -> bool {
        self.rmse.is_finite() && self.mae.is_finite() && self.r2.is_finite()
    }
}

/// Mean and standard deviation of each metric across cross-validation folds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CvMetrics {
    pub rmse_mean: f64,
    pub rmse_std: f64,
    pub mae_mean: f64,
    pub mae_std: f64,
    pub r2_mean: f64,
    pub r2_std: f64,
    pub folds: usize,
}

impl CvMetrics {
    /// Aggregate per-fold metric sets. Returns `None` for an empty slice.
    pub fn aggregate(folds: &[MetricSet]) -> Option<Self> {
        if folds.is_empty() {
            return None;
        }
        let (rmse_mean, rmse_std) = mean_std(folds.iter().map(|m| m.rmse));
        let (mae_mean, mae_std) = mean_std(folds.iter().map(|m| m.mae));
        let (r2_mean, r2_std) = mean_std(folds.iter().map(|m| m.r2));
        Some(Self {
            rmse_mean,
            rmse_std,
            mae_mean,
            mae_std,
            r2_mean,
            r2_std,
            folds: folds.len(),
        })
    }
}

/// Compute RMSE, MAE and R² for a prediction vector against its targets.
///
/// Errors with `MetricComputation` when the inputs are empty, mismatched,
/// or contain non-finite values.
pub fn compute_metrics(targets: &[f64], predictions: &[f64]) -> Result<MetricSet> {
    if targets.is_empty() {
        return Err(RecastError::MetricComputation(
            "cannot compute metrics over an empty partition".to_string(),
        ));
    }
    if targets.len() != predictions.len() {
        return Err(RecastError::MetricComputation(format!(
            "prediction count {} != target count {}",
            predictions.len(),
            targets.len()
        )));
    }
    if let Some(i) = predictions.iter().position(|p| !p.is_finite()) {
        return Err(RecastError::MetricComputation(format!(
            "non-finite prediction at row {i}"
        )));
    }
    if let Some(i) = targets.iter().position(|t| !t.is_finite()) {
        return Err(RecastError::MetricComputation(format!(
            "non-finite target at row {i}"
        )));
    }

    let n = targets.len() as f64;
    let mut sq_err = 0.0;
    let mut abs_err = 0.0;
    for (t, p) in targets.iter().zip(predictions.iter()) {
        let e = p - t;
        sq_err += e * e;
        abs_err += e.abs();
    }
    let rmse = (sq_err / n).sqrt();
    let mae = abs_err / n;

    let target_mean = targets.iter().sum::<f64>() / n;
    let ss_tot: f64 = targets.iter().map(|t| (t - target_mean).powi(2)).sum();
    // Constant target column: define R² as 1.0 for a perfect fit, 0.0 otherwise.
    let r2 = if ss_tot == 0.0 {
        if sq_err == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - sq_err / ss_tot
    };

    Ok(MetricSet { rmse, mae, r2 })
}

fn mean_std(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let n = values.clone().count() as f64;
    let mean = values.clone().sum::<f64>() / n;
    let var = values.map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions() {
        let y = [1.0, 2.0, 3.0, 4.0];
        let m = compute_metrics(&y, &y).unwrap();
        assert_eq!(m.rmse, 0.0);
        assert_eq!(m.mae, 0.0);
        assert_eq!(m.r2, 1.0);
    }

    #[test]
    fn known_values() {
        let targets = [1.0, 2.0, 3.0];
        let preds = [2.0, 2.0, 2.0];
        let m = compute_metrics(&targets, &preds).unwrap();
        // errors: 1, 0, -1 -> mse = 2/3
        assert!((m.rmse - (2.0_f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!((m.mae - 2.0 / 3.0).abs() < 1e-12);
        // ss_tot = 2, ss_res = 2 -> r2 = 0
        assert!(m.r2.abs() < 1e-12);
    }

    #[test]
    fn non_finite_prediction_is_error() {
        let targets = [1.0, 2.0];
        let preds = [1.0, f64::NAN];
        let err = compute_metrics(&targets, &preds).unwrap_err();
        assert!(matches!(err, RecastError::MetricComputation(_)));
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let err = compute_metrics(&[1.0, 2.0], &[1.0]).unwrap_err();
        assert!(matches!(err, RecastError::MetricComputation(_)));
    }

    #[test]
    fn cv_aggregation() {
        let folds = [
            MetricSet {
                rmse: 1.0,
                mae: 0.5,
                r2: 0.9,
            },
            MetricSet {
                rmse: 3.0,
                mae: 1.5,
                r2: 0.7,
            },
        ];
        let cv = CvMetrics::aggregate(&folds).unwrap();
        assert_eq!(cv.folds, 2);
        assert!((cv.rmse_mean - 2.0).abs() < 1e-12);
        assert!((cv.rmse_std - 1.0).abs() < 1e-12);
        assert!((cv.r2_mean - 0.8).abs() < 1e-12);
    }

    #[test]
    fn cv_aggregation_empty_is_none() {
        assert!(CvMetrics::aggregate(&[]).is_none());
    }
}
