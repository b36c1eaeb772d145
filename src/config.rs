use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::kpi::KpiThresholds;
use crate::model::{Hyperparameters, ModelType};
use crate::promote::PromotionPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub tuning: TuningConfig,
    pub kpi: KpiConfig,
    #[serde(default)]
    pub promotion: PromotionConfig,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Directory holding the versioned gold datasets
    pub dir: String,
    /// Path of the persisted data-state file
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// Logical version tag -> dataset path
    pub versions: BTreeMap<String, String>,
    /// Feature columns every dataset version is expected to carry.
    /// Missing columns are filled with a neutral 0.0 default.
    #[serde(default)]
    pub expected_features: Vec<String>,
}

fn default_state_file() -> String {
    "models/data_state.json".to_string()
}

impl DataConfig {
    /// Resolve the dataset path for a version tag
    pub fn path_for(&self, version: &str) -> Option<&str> {
        self.versions.get(version).map(String::as_str)
    }

    /// Recognized version markers, in tag order
    pub fn version_markers(&self) -> Vec<String> {
        self.versions.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Default model family used when the CLI gives no override
    #[serde(default)]
    pub model_type: ModelType,
    /// Fraction of rows held out as the temporal test partition
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    /// Walk-forward cross-validation fold count
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,
    /// Default hyperparameters
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
}

fn default_test_fraction() -> f64 {
    0.2
}

fn default_cv_folds() -> usize {
    5
}

/// Hyperparameter grid for `recast tune`. Enumeration order is the
/// declared field order, outer to inner.
#[derive(Debug, Clone, Deserialize)]
pub struct TuningConfig {
    pub n_estimators: Vec<usize>,
    pub max_depth: Vec<usize>,
    pub learning_rate: Vec<f64>,
    pub min_samples_split: Vec<usize>,
    /// Fold count for the per-configuration stability estimate
    #[serde(default = "default_tuning_cv_folds")]
    pub cv_folds: usize,
}

fn default_tuning_cv_folds() -> usize {
    3
}

impl TuningConfig {
    pub fn grid_size(&self) -> usize {
        self.n_estimators.len()
            * self.max_depth.len()
            * self.learning_rate.len()
            * self.min_samples_split.len()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KpiConfig {
    pub thresholds: KpiThresholds,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PromotionConfig {
    /// Decision policy; `strict` is canonical
    #[serde(default)]
    pub policy: PromotionPolicy,
    /// Restrict the incumbent query to the candidate's data version
    #[serde(default)]
    pub scope_to_version: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Root directory of the file-backed run registry
    pub root: String,
    /// Experiment name tagged onto every run
    #[serde(default = "default_experiment")]
    pub experiment: String,
}

fn default_experiment() -> String {
    "forecast-ct".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum data versions trained concurrently during update-check.
    /// 1 reproduces the strictly sequential reference behavior.
    #[serde(default = "default_max_parallel_versions")]
    pub max_parallel_versions: usize,
}

fn default_max_parallel_versions() -> usize {
    1
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_parallel_versions: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("data.state_file", default_state_file())?
            .set_default("model.test_fraction", default_test_fraction())?
            .set_default("model.cv_folds", default_cv_folds() as i64)?
            .set_default("tuning.cv_folds", default_tuning_cv_folds() as i64)?
            .set_default("registry.experiment", default_experiment())?
            .set_default("pipeline.max_parallel_versions", 1)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("RECAST_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (RECAST_REGISTRY__ROOT, etc.)
            .add_source(
                Environment::with_prefix("RECAST")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.data.versions.is_empty() {
            errors.push("data.versions must map at least one version tag".to_string());
        }

        if self.model.test_fraction <= 0.0 || self.model.test_fraction >= 1.0 {
            errors.push("model.test_fraction must be between 0 and 1".to_string());
        }

        if self.model.cv_folds < 2 {
            errors.push("model.cv_folds must be at least 2".to_string());
        }

        if let Err(e) = self.model.hyperparameters.validate() {
            errors.push(format!("model.hyperparameters: {e}"));
        }

        if self.tuning.grid_size() == 0 {
            errors.push("tuning grid must not be empty in any dimension".to_string());
        }

        let t = &self.kpi.thresholds;
        if t.rmse_acceptable <= 0.0 {
            errors.push("kpi.thresholds.rmse_acceptable must be positive".to_string());
        }
        if t.mae_acceptable <= 0.0 {
            errors.push("kpi.thresholds.mae_acceptable must be positive".to_string());
        }
        if !(-1.0..=1.0).contains(&t.r2_minimum) {
            errors.push("kpi.thresholds.r2_minimum must be within [-1, 1]".to_string());
        }

        if self.registry.root.trim().is_empty() {
            errors.push("registry.root must not be empty".to_string());
        }

        if self.pipeline.max_parallel_versions == 0 {
            errors.push("pipeline.max_parallel_versions must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> AppConfig {
        AppConfig {
            data: DataConfig {
                dir: "data/gold".to_string(),
                state_file: default_state_file(),
                versions: BTreeMap::from([
                    ("v1".to_string(), "data/gold/gold_v1.csv".to_string()),
                    ("v2".to_string(), "data/gold/gold_v2.csv".to_string()),
                ]),
                expected_features: vec![],
            },
            model: ModelConfig {
                model_type: ModelType::GradientBoosting,
                test_fraction: 0.2,
                cv_folds: 5,
                hyperparameters: Hyperparameters::default(),
            },
            tuning: TuningConfig {
                n_estimators: vec![100, 200],
                max_depth: vec![2, 3],
                learning_rate: vec![0.05, 0.1],
                min_samples_split: vec![2],
                cv_folds: 3,
            },
            kpi: KpiConfig {
                thresholds: KpiThresholds {
                    rmse_acceptable: 2.0,
                    mae_acceptable: 1.5,
                    r2_minimum: 0.5,
                },
            },
            promotion: PromotionConfig::default(),
            registry: RegistryConfig {
                root: "mlruns".to_string(),
                experiment: default_experiment(),
            },
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn sample_config_validates() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn bad_test_fraction_rejected() {
        let mut cfg = sample_config();
        cfg.model.test_fraction = 1.0;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("test_fraction")));
    }

    #[test]
    fn empty_grid_rejected() {
        let mut cfg = sample_config();
        cfg.tuning.learning_rate.clear();
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("tuning grid")));
    }

    #[test]
    fn version_markers_in_tag_order() {
        let cfg = sample_config();
        assert_eq!(cfg.data.version_markers(), vec!["v1", "v2"]);
        assert_eq!(cfg.data.path_for("v2"), Some("data/gold/gold_v2.csv"));
    }
}
