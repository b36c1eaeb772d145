//! The continuous-training update cycle.
//!
//! One cycle: take the state lock, scan the gold directory, diff against
//! the persisted state, resolve changed files to dataset versions, retrain
//! each affected version, run the promotion comparison, and finally commit
//! the new data state. Per-version failures are isolated; the failed
//! version keeps its prior state entry so the same change is picked up
//! again on the next cycle. Cycle-fatal errors (config, resolution,
//! registry, lock, cancellation) abort before the commit.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{RecastError, Result};
use crate::kpi::KpiStatus;
use crate::model::{HyperparameterOverrides, ModelType};
use crate::promote::{self, PromotionDecision, PromotionOutcome};
use crate::registry::RunRegistry;
use crate::snapshot::{detect_changes, scan_dir, ChangeSet, StateStore};
use crate::trainer::{TrainRequest, Trainer, TrainingRun};
use crate::version;

pub const PROMOTION_ARTIFACT: &str = "promotion.json";
pub const PROMOTION_TAG: &str = "promotion";

/// What happened to one dataset version during a cycle.
#[derive(Debug, Clone)]
pub enum VersionResult {
    Trained {
        run_id: Uuid,
        kpi: KpiStatus,
        promotion: PromotionOutcome,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone)]
pub struct VersionOutcome {
    pub version: String,
    pub files: Vec<String>,
    pub result: VersionResult,
}

impl VersionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, VersionResult::Trained { .. })
    }
}

/// Summary of one update-check invocation.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub changes: ChangeSet,
    pub outcomes: Vec<VersionOutcome>,
    pub up_to_date: bool,
    pub state_committed: bool,
}

impl CycleReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "update-check: {} new, {} modified, {} unchanged, {} missing",
            self.changes.new.len(),
            self.changes.modified.len(),
            self.changes.unchanged.len(),
            self.changes.missing.len()
        );
        if self.up_to_date {
            let _ = writeln!(out, "datasets are up to date; nothing to train");
            return out;
        }
        for outcome in &self.outcomes {
            match &outcome.result {
                VersionResult::Trained {
                    run_id,
                    kpi,
                    promotion,
                } => {
                    let _ = writeln!(
                        out,
                        "  {}: run {} kpi={} promotion={} ({})",
                        outcome.version,
                        run_id,
                        kpi,
                        promotion,
                        outcome.files.join(", ")
                    );
                }
                VersionResult::Failed { error } => {
                    let _ = writeln!(out, "  {}: FAILED: {}", outcome.version, error);
                }
            }
        }
        let _ = writeln!(
            out,
            "data state committed: {}",
            if self.state_committed { "yes" } else { "no" }
        );
        out
    }
}

/// Train one configured version and run the promotion comparison against
/// the incumbent. Used both by the single-version `train` operation and
/// by the update cycle.
pub fn train_and_decide(
    config: &AppConfig,
    registry: &dyn RunRegistry,
    request: &TrainRequest,
) -> Result<(TrainingRun, PromotionDecision)> {
    let trainer = Trainer::new(
        registry,
        &config.registry.experiment,
        config.kpi.thresholds,
        config.model.test_fraction,
        config.model.cv_folds,
        config.data.expected_features.clone(),
    );
    let run = trainer.train(request)?;
    let decision = promote::decide(
        registry,
        &config.registry.experiment,
        &run.record,
        config.promotion.policy,
        config.promotion.scope_to_version,
    )?;
    registry.set_tag(run.record.run_id, PROMOTION_TAG, decision.outcome.as_tag())?;
    registry.log_artifact(run.record.run_id, PROMOTION_ARTIFACT, &decision.to_report()?)?;
    Ok((run, decision))
}

/// Build a train request for a configured version tag.
pub fn request_for_version(
    config: &AppConfig,
    version: &str,
    model_type: Option<ModelType>,
    overrides: Option<HyperparameterOverrides>,
) -> Result<TrainRequest> {
    let path = config.data.path_for(version).ok_or_else(|| {
        RecastError::VersionResolution(format!("no dataset configured for version {version:?}"))
    })?;
    let hyperparameters = overrides
        .unwrap_or_default()
        .apply(config.model.hyperparameters);
    hyperparameters
        .validate()
        .map_err(RecastError::Validation)?;
    Ok(TrainRequest {
        data_version: version.to_string(),
        dataset_path: path.to_string(),
        model_type: model_type.unwrap_or(config.model.model_type),
        hyperparameters,
    })
}

pub struct UpdateCycle {
    config: AppConfig,
    registry: Arc<dyn RunRegistry>,
    cancel: watch::Receiver<bool>,
}

impl UpdateCycle {
    pub fn new(
        config: AppConfig,
        registry: Arc<dyn RunRegistry>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            registry,
            cancel,
        }
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Run one full update cycle.
    pub async fn run(&self) -> Result<CycleReport> {
        let store = StateStore::new(&self.config.data.state_file);
        let _lock = store.lock()?;

        let prior = store.load()?;
        let current = scan_dir(Path::new(&self.config.data.dir))?;
        let changes = detect_changes(&current, &prior);
        for name in &changes.missing {
            warn!(file = %name, "tracked dataset file is missing");
        }
        info!(
            new = changes.new.len(),
            modified = changes.modified.len(),
            unchanged = changes.unchanged.len(),
            missing = changes.missing.len(),
            "change detection finished"
        );

        if !changes.has_changes() {
            return Ok(CycleReport {
                changes,
                outcomes: Vec::new(),
                up_to_date: true,
                state_committed: false,
            });
        }

        let markers = self.config.data.version_markers();
        let resolution =
            version::resolve(&changes.requiring_training(), &markers).require_complete()?;

        let units: Vec<(String, Vec<String>)> = resolution.versions.into_iter().collect();
        let max_parallel = self.config.pipeline.max_parallel_versions.max(1);
        let mut outcomes = Vec::with_capacity(units.len());

        for batch in units.chunks(max_parallel) {
            // Cancellation only takes effect between version units; a fit
            // in progress always runs to completion.
            if self.cancelled() {
                return Err(RecastError::Cancelled);
            }

            let mut handles = Vec::with_capacity(batch.len());
            for (version, files) in batch {
                let config = self.config.clone();
                let registry = Arc::clone(&self.registry);
                let task_version = version.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    let request = request_for_version(&config, &task_version, None, None)?;
                    train_and_decide(&config, registry.as_ref(), &request)
                });
                handles.push((version.clone(), files.clone(), handle));
            }

            for (version, files, handle) in handles {
                let joined = handle.await.map_err(|e| {
                    RecastError::Internal(format!("training task for {version} panicked: {e}"))
                })?;
                let result = match joined {
                    Ok((run, decision)) => VersionResult::Trained {
                        run_id: run.record.run_id,
                        kpi: run.kpi_status,
                        promotion: decision.outcome,
                    },
                    Err(e) if e.is_cycle_fatal() => return Err(e),
                    Err(e) => {
                        error!(version = %version, error = %e, "version training failed");
                        VersionResult::Failed {
                            error: e.to_string(),
                        }
                    }
                };
                outcomes.push(VersionOutcome {
                    version,
                    files,
                    result,
                });
            }
        }

        let committed = self.commit_state(&store, &prior, &current, &changes, &outcomes)?;
        let report = CycleReport {
            changes,
            outcomes,
            up_to_date: false,
            state_committed: committed,
        };
        info!(
            versions = report.outcomes.len(),
            succeeded = report.outcomes.iter().filter(|o| o.is_success()).count(),
            committed = report.state_committed,
            "update cycle finished"
        );
        Ok(report)
    }

    /// Commit the post-cycle data state: fresh snapshots for unchanged
    /// files and for files of successfully trained versions, prior entries
    /// for failed versions, missing files dropped.
    fn commit_state(
        &self,
        store: &StateStore,
        prior: &crate::snapshot::DataState,
        current: &crate::snapshot::DataState,
        changes: &ChangeSet,
        outcomes: &[VersionOutcome],
    ) -> Result<bool> {
        let mut next = prior.clone();
        for name in &changes.missing {
            next.files.remove(name);
        }
        for name in &changes.unchanged {
            if let Some(snap) = current.files.get(name) {
                next.files.insert(name.clone(), snap.clone());
            }
        }
        for outcome in outcomes {
            if !outcome.is_success() {
                continue;
            }
            for file in &outcome.files {
                if let Some(snap) = current.files.get(file) {
                    next.files.insert(file.clone(), snap.clone());
                }
            }
        }
        store.commit(&next)?;
        Ok(true)
    }
}
