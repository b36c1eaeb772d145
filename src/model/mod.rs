//! Model backends consumed by the trainer as black boxes.
//!
//! Every family implements [`ModelBackend`]: fit on a feature matrix and
//! target vector, predict, and export the fitted state as a JSON artifact
//! for the run registry. The numerical details stay behind the trait so the
//! orchestration layer never depends on a specific family.

mod boosting;
mod forest;
mod linear;
mod tree;

pub use boosting::GradientBoosting;
pub use forest::RandomForest;
pub use linear::LinearRegression;
pub use tree::RegressionTree;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RecastError, Result};

/// A trainable forecasting model.
pub trait ModelBackend: Send {
    /// Fit on a row-major feature matrix and its target vector.
    fn fit(&mut self, features: &[Vec<f64>], target: &[f64]) -> Result<()>;

    /// Predict one value per feature row. Requires a prior `fit`.
    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>>;

    /// Serialize the fitted state for artifact storage.
    fn to_artifact(&self) -> Result<serde_json::Value>;
}

/// Supported model families.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    #[default]
    GradientBoosting,
    RandomForest,
    LinearRegression,
}

impl ModelType {
    /// Tag value as stored in the run registry.
    pub fn as_tag(self) -> &'static str {
        match self {
            ModelType::GradientBoosting => "gradient_boosting",
            ModelType::RandomForest => "random_forest",
            ModelType::LinearRegression => "linear_regression",
        }
    }

    pub fn parse_tag(tag: &str) -> Result<Self> {
        match tag {
            "gradient_boosting" => Ok(ModelType::GradientBoosting),
            "random_forest" => Ok(ModelType::RandomForest),
            "linear_regression" => Ok(ModelType::LinearRegression),
            other => Err(RecastError::UnknownModelType(other.to_string())),
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Hyperparameters shared across families. Families ignore what they do not
/// use (linear regression only reads the seed).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub subsample: f64,
    pub seed: u64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            n_estimators: 300,
            max_depth: 3,
            learning_rate: 0.05,
            min_samples_split: 2,
            min_samples_leaf: 1,
            subsample: 1.0,
            seed: 42,
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.n_estimators == 0 {
            return Err("n_estimators must be > 0".to_string());
        }
        if self.max_depth == 0 {
            return Err("max_depth must be > 0".to_string());
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err("learning_rate must be in (0, 1]".to_string());
        }
        if self.min_samples_split < 2 {
            return Err("min_samples_split must be >= 2".to_string());
        }
        if self.min_samples_leaf == 0 {
            return Err("min_samples_leaf must be >= 1".to_string());
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err("subsample must be in (0, 1]".to_string());
        }
        Ok(())
    }

    /// Key/value pairs as logged to the run registry.
    pub fn to_params(&self) -> Vec<(String, String)> {
        vec![
            ("n_estimators".to_string(), self.n_estimators.to_string()),
            ("max_depth".to_string(), self.max_depth.to_string()),
            ("learning_rate".to_string(), self.learning_rate.to_string()),
            (
                "min_samples_split".to_string(),
                self.min_samples_split.to_string(),
            ),
            (
                "min_samples_leaf".to_string(),
                self.min_samples_leaf.to_string(),
            ),
            ("subsample".to_string(), self.subsample.to_string()),
            ("seed".to_string(), self.seed.to_string()),
        ]
    }
}

/// Partial hyperparameter overrides, e.g. from `--params` JSON on the CLI.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HyperparameterOverrides {
    pub n_estimators: Option<usize>,
    pub max_depth: Option<usize>,
    pub learning_rate: Option<f64>,
    pub min_samples_split: Option<usize>,
    pub min_samples_leaf: Option<usize>,
    pub subsample: Option<f64>,
    pub seed: Option<u64>,
}

impl HyperparameterOverrides {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            RecastError::Validation(format!("cannot parse hyperparameter overrides: {e}"))
        })
    }

    pub fn apply(&self, base: Hyperparameters) -> Hyperparameters {
        Hyperparameters {
            n_estimators: self.n_estimators.unwrap_or(base.n_estimators),
            max_depth: self.max_depth.unwrap_or(base.max_depth),
            learning_rate: self.learning_rate.unwrap_or(base.learning_rate),
            min_samples_split: self.min_samples_split.unwrap_or(base.min_samples_split),
            min_samples_leaf: self.min_samples_leaf.unwrap_or(base.min_samples_leaf),
            subsample: self.subsample.unwrap_or(base.subsample),
            seed: self.seed.unwrap_or(base.seed),
        }
    }
}

/// Construct an unfitted backend for a model family.
pub fn build_backend(model_type: ModelType, hp: &Hyperparameters) -> Box<dyn ModelBackend> {
    match model_type {
        ModelType::GradientBoosting => Box::new(GradientBoosting::new(*hp)),
        ModelType::RandomForest => Box::new(RandomForest::new(*hp)),
        ModelType::LinearRegression => Box::new(LinearRegression::new(hp.seed)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_partially() {
        let base = Hyperparameters::default();
        let overrides = HyperparameterOverrides::from_json(r#"{"max_depth": 5}"#).unwrap();
        let merged = overrides.apply(base);
        assert_eq!(merged.max_depth, 5);
        assert_eq!(merged.n_estimators, base.n_estimators);
    }

    #[test]
    fn unknown_override_key_rejected() {
        assert!(HyperparameterOverrides::from_json(r#"{"depth": 5}"#).is_err());
    }

    #[test]
    fn model_type_tag_round_trip() {
        for mt in [
            ModelType::GradientBoosting,
            ModelType::RandomForest,
            ModelType::LinearRegression,
        ] {
            assert_eq!(ModelType::parse_tag(mt.as_tag()).unwrap(), mt);
        }
        assert!(ModelType::parse_tag("svm").is_err());
    }

    #[test]
    fn default_hyperparameters_validate() {
        assert!(Hyperparameters::default().validate().is_ok());
    }

    #[test]
    fn zero_estimators_rejected() {
        let hp = Hyperparameters {
            n_estimators: 0,
            ..Default::default()
        };
        assert!(hp.validate().is_err());
    }
}
