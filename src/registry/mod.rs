//! Run registry: append-oriented storage for training runs.
//!
//! Every training or tuning invocation records one run with params,
//! metrics, tags and JSON artifacts. The promotion logic queries past runs
//! through the same trait, so the decision code never knows whether it is
//! talking to the filesystem backend or the in-memory one.

mod fs;
mod memory;

pub use fs::FsRegistry;
pub use memory::InMemoryRegistry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::Result;

/// Metric key the incumbent ordering sorts on.
pub const TEST_RMSE_KEY: &str = "test_rmse";
pub const TEST_MAE_KEY: &str = "test_mae";
pub const TEST_R2_KEY: &str = "test_r2";

/// Well-known tag keys shared by the trainer and the promotion logic.
pub const KPI_STATUS_TAG: &str = "kpi_status";
pub const DATA_VERSION_TAG: &str = "data_version";
pub const MODEL_TYPE_TAG: &str = "model_type";

/// One recorded run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub experiment: String,
    pub created_at: DateTime<Utc>,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
    /// Artifact names logged for this run.
    pub artifacts: Vec<String>,
}

impl RunRecord {
    pub fn new(experiment: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            experiment: experiment.to_string(),
            created_at: Utc::now(),
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            tags: BTreeMap::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Tag-equality filter over recorded runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFilter {
    pub experiment: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl RunFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn experiment(mut self, name: &str) -> Self {
        self.experiment = Some(name.to_string());
        self
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn matches(&self, run: &RunRecord) -> bool {
        if let Some(exp) = &self.experiment {
            if &run.experiment != exp {
                return false;
            }
        }
        self.tags
            .iter()
            .all(|(k, v)| run.tags.get(k).map_or(false, |t| t == v))
    }
}

/// Sort order for run queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOrder {
    /// Ascending test RMSE; ties break toward the earliest run. Runs
    /// without the metric sort last.
    TestRmseAsc,
    CreatedAtDesc,
}

pub(crate) fn sort_runs(runs: &mut [RunRecord], order: RunOrder) {
    match order {
        RunOrder::TestRmseAsc => runs.sort_by(|a, b| {
            let ra = a.metric(TEST_RMSE_KEY);
            let rb = b.metric(TEST_RMSE_KEY);
            match (ra, rb) {
                (Some(x), Some(y)) => x
                    .partial_cmp(&y)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.created_at.cmp(&b.created_at)),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.created_at.cmp(&b.created_at),
            }
        }),
        RunOrder::CreatedAtDesc => runs.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
    }
}

/// Storage backend for training runs.
pub trait RunRegistry: Send + Sync {
    /// Open a new run under an experiment and return its record.
    fn create_run(&self, experiment: &str) -> Result<RunRecord>;

    fn log_param(&self, run_id: Uuid, key: &str, value: &str) -> Result<()>;

    fn log_metric(&self, run_id: Uuid, key: &str, value: f64) -> Result<()>;

    fn set_tag(&self, run_id: Uuid, key: &str, value: &str) -> Result<()>;

    /// Store a JSON artifact under the run and register its name.
    fn log_artifact(&self, run_id: Uuid, name: &str, payload: &serde_json::Value) -> Result<()>;

    fn get_run(&self, run_id: Uuid) -> Result<RunRecord>;

    /// Filtered, ordered query; `limit = 0` means no limit.
    fn query_runs(&self, filter: &RunFilter, order: RunOrder, limit: usize)
        -> Result<Vec<RunRecord>>;
}
