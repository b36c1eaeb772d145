//! File-backed run registry.
//!
//! Layout under the registry root:
//!
//! ```text
//! <root>/runs/<run_id>.json        one RunRecord per file
//! <root>/artifacts/<run_id>/<name> JSON artifacts
//! ```
//!
//! Mutations are read-modify-write on the per-run JSON file. That is safe
//! here because a run is only written by the invocation that created it;
//! cross-invocation concurrency is serialized by the pipeline state lock.

use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

use super::{sort_runs, RunFilter, RunOrder, RunRecord, RunRegistry};
use crate::error::{RecastError, Result};

#[derive(Debug, Clone)]
pub struct FsRegistry {
    root: PathBuf,
}

impl FsRegistry {
    /// Open (and create if needed) a registry rooted at `root`.
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        let registry = Self { root };
        fs::create_dir_all(registry.runs_dir())
            .map_err(|e| RecastError::Registry(format!("cannot create runs dir: {e}")))?;
        fs::create_dir_all(registry.artifacts_dir())
            .map_err(|e| RecastError::Registry(format!("cannot create artifacts dir: {e}")))?;
        Ok(registry)
    }

    fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    fn run_path(&self, run_id: Uuid) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.json"))
    }

    fn read_run(&self, run_id: Uuid) -> Result<RunRecord> {
        let path = self.run_path(run_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RecastError::RunNotFound(run_id.to_string()));
            }
            Err(e) => {
                return Err(RecastError::Registry(format!(
                    "cannot read run {run_id}: {e}"
                )));
            }
        };
        serde_json::from_str(&raw)
            .map_err(|e| RecastError::Registry(format!("run {run_id} is corrupt: {e}")))
    }

    fn write_run(&self, run: &RunRecord) -> Result<()> {
        let raw = serde_json::to_string_pretty(run)?;
        fs::write(self.run_path(run.run_id), raw)
            .map_err(|e| RecastError::Registry(format!("cannot write run {}: {e}", run.run_id)))
    }

    fn update<F: FnOnce(&mut RunRecord)>(&self, run_id: Uuid, apply: F) -> Result<()> {
        let mut run = self.read_run(run_id)?;
        apply(&mut run);
        self.write_run(&run)
    }
}

impl RunRegistry for FsRegistry {
    fn create_run(&self, experiment: &str) -> Result<RunRecord> {
        let run = RunRecord::new(experiment);
        self.write_run(&run)?;
        Ok(run)
    }

    fn log_param(&self, run_id: Uuid, key: &str, value: &str) -> Result<()> {
        self.update(run_id, |run| {
            run.params.insert(key.to_string(), value.to_string());
        })
    }

    fn log_metric(&self, run_id: Uuid, key: &str, value: f64) -> Result<()> {
        self.update(run_id, |run| {
            run.metrics.insert(key.to_string(), value);
        })
    }

    fn set_tag(&self, run_id: Uuid, key: &str, value: &str) -> Result<()> {
        self.update(run_id, |run| {
            run.tags.insert(key.to_string(), value.to_string());
        })
    }

    fn log_artifact(&self, run_id: Uuid, name: &str, payload: &serde_json::Value) -> Result<()> {
        let dir = self.artifacts_dir().join(run_id.to_string());
        fs::create_dir_all(&dir)
            .map_err(|e| RecastError::Registry(format!("cannot create artifact dir: {e}")))?;
        let raw = serde_json::to_string_pretty(payload)?;
        fs::write(dir.join(name), raw)
            .map_err(|e| RecastError::Registry(format!("cannot write artifact {name}: {e}")))?;
        self.update(run_id, |run| {
            if !run.artifacts.iter().any(|a| a == name) {
                run.artifacts.push(name.to_string());
            }
        })
    }

    fn get_run(&self, run_id: Uuid) -> Result<RunRecord> {
        self.read_run(run_id)
    }

    fn query_runs(
        &self,
        filter: &RunFilter,
        order: RunOrder,
        limit: usize,
    ) -> Result<Vec<RunRecord>> {
        let entries = fs::read_dir(self.runs_dir())
            .map_err(|e| RecastError::Registry(format!("cannot list runs: {e}")))?;

        let mut runs = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| RecastError::Registry(format!("cannot list runs: {e}")))?;
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let raw = fs::read_to_string(&path)
                .map_err(|e| RecastError::Registry(format!("cannot read {}: {e}", path.display())))?;
            let run: RunRecord = serde_json::from_str(&raw).map_err(|e| {
                RecastError::Registry(format!("corrupt run file {}: {e}", path.display()))
            })?;
            if filter.matches(&run) {
                runs.push(run);
            }
        }

        sort_runs(&mut runs, order);
        if limit > 0 {
            runs.truncate(limit);
        }
        Ok(runs)
    }
}
