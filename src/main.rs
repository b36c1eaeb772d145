use clap::Parser;
use recast::cli::{Cli, Commands};
use recast::config::AppConfig;
use recast::error::{RecastError, Result};
use recast::model::HyperparameterOverrides;
use recast::pipeline::{self, UpdateCycle};
use recast::registry::{FsRegistry, RunRegistry};
use recast::tune::Tuner;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load_from(&cli.config)?;
    if let Err(errors) = config.validate() {
        return Err(RecastError::InvalidConfig(errors.join("; ")));
    }
    init_logging(&config);

    let registry: Arc<dyn RunRegistry> = Arc::new(FsRegistry::open(&config.registry.root)?);

    match cli.command {
        Commands::Train {
            version,
            model_type,
            params,
        } => {
            let overrides = params
                .as_deref()
                .map(HyperparameterOverrides::from_json)
                .transpose()?;
            let request = pipeline::request_for_version(&config, &version, model_type, overrides)?;
            let registry = Arc::clone(&registry);
            let task_config = config.clone();
            let (run, decision) = tokio::task::spawn_blocking(move || {
                pipeline::train_and_decide(&task_config, registry.as_ref(), &request)
            })
            .await
            .map_err(|e| RecastError::Internal(format!("training task panicked: {e}")))??;

            println!("run {}", run.record.run_id);
            println!(
                "test: rmse={:.4} mae={:.4} r2={:.4}",
                run.test.rmse, run.test.mae, run.test.r2
            );
            if let Some(cv) = &run.cv {
                println!(
                    "cv ({} folds): rmse={:.4}+/-{:.4}",
                    cv.folds, cv.rmse_mean, cv.rmse_std
                );
            }
            println!("kpi: {}", run.kpi_status);
            println!("promotion: {} ({})", decision.outcome, decision.reason);
        }
        Commands::Tune {
            version,
            model_type,
        } => {
            let request = pipeline::request_for_version(&config, &version, model_type, None)?;
            let registry = Arc::clone(&registry);
            let task_config = config.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                let tuner = Tuner::new(
                    registry.as_ref(),
                    &task_config.registry.experiment,
                    task_config.kpi.thresholds,
                    task_config.model.test_fraction,
                    task_config.tuning.clone(),
                    request.hyperparameters,
                    task_config.data.expected_features.clone(),
                );
                tuner.tune(&request.data_version, &request.dataset_path, request.model_type)
            })
            .await
            .map_err(|e| RecastError::Internal(format!("tuning task panicked: {e}")))??;

            println!(
                "best run {} (test rmse {:.4}, {} configurations)",
                outcome.best_run_id, outcome.best_rmse, outcome.evaluated
            );
        }
        Commands::UpdateCheck => {
            let cancel = shutdown_channel();
            let cycle = UpdateCycle::new(config, registry, cancel);
            let report = cycle.run().await?;
            print!("{}", report.render());
        }
    }
    Ok(())
}

/// Flip to `true` on Ctrl-C; the update cycle checks it between versions.
fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("shutdown requested; finishing the current version");
            let _ = tx.send(true);
        }
    });
    rx
}

fn init_logging(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{0},recast={0}", config.logging.level))
    });

    // File logging is optional: prefer RECAST_LOG_DIR, fall back to LOG_DIR.
    let log_dir = std::env::var("RECAST_LOG_DIR").or_else(|_| std::env::var("LOG_DIR"));

    // `tracing_appender::rolling::daily` panics if it cannot create the
    // initial log file, so writability is checked up front.
    let file_writer = log_dir.ok().and_then(|dir| {
        if std::fs::create_dir_all(&dir).is_err() {
            eprintln!("Warning: could not create log directory {dir}, file logging disabled");
            return None;
        }
        let test_path = std::path::Path::new(&dir).join(".recast_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                let file_appender = tracing_appender::rolling::daily(&dir, "recast.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                // Keep the guard alive for the process lifetime.
                Box::leak(Box::new(guard));
                eprintln!("Logging to: {dir}/recast.log");
                Some(non_blocking)
            }
            Err(e) => {
                eprintln!("Warning: could not write to log directory {dir} ({e}), file logging disabled");
                None
            }
        }
    });

    if config.logging.json {
        let console_layer = tracing_subscriber::fmt::layer().json().with_target(true);
        let file_layer = file_writer.map(|w| {
            tracing_subscriber::fmt::layer()
                .with_writer(w)
                .with_ansi(false)
                .with_target(true)
                .boxed()
        });
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false);
        let file_layer = file_writer.map(|w| {
            tracing_subscriber::fmt::layer()
                .with_writer(w)
                .with_ansi(false)
                .with_target(true)
                .boxed()
        });
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .init();
    }
}
