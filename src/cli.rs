use clap::{Parser, Subcommand};

use crate::model::ModelType;

#[derive(Parser)]
#[command(name = "recast")]
#[command(author = "Recast Team")]
#[command(version = "0.1.0")]
#[command(about = "Continuous-training pipeline for tabular time-series forecasting", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory
    #[arg(short, long, default_value = "config")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train one dataset version and compare it against the incumbent
    Train {
        /// Dataset version tag, e.g. v1
        version: String,

        /// Model family override
        #[arg(short, long, value_enum)]
        model_type: Option<ModelType>,

        /// Hyperparameter overrides as JSON, e.g. '{"max_depth": 5}'
        #[arg(short, long)]
        params: Option<String>,
    },

    /// Grid-search hyperparameters on one dataset version
    Tune {
        /// Dataset version tag, e.g. v1
        version: String,

        /// Model family override
        #[arg(short, long, value_enum)]
        model_type: Option<ModelType>,
    },

    /// Detect dataset changes and retrain every affected version
    UpdateCheck,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_train_with_overrides() {
        let cli = Cli::parse_from([
            "recast",
            "train",
            "v2",
            "--model-type",
            "random-forest",
            "--params",
            r#"{"max_depth": 5}"#,
        ]);
        match cli.command {
            Commands::Train {
                version,
                model_type,
                params,
            } => {
                assert_eq!(version, "v2");
                assert_eq!(model_type, Some(ModelType::RandomForest));
                assert!(params.is_some());
            }
            _ => panic!("expected train subcommand"),
        }
    }

    #[test]
    fn parses_update_check_with_config_dir() {
        let cli = Cli::parse_from(["recast", "--config", "conf.d", "update-check"]);
        assert!(matches!(cli.command, Commands::UpdateCheck));
        assert_eq!(cli.config, "conf.d");
    }
}
