//! In-memory registry backend for decision-logic tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{sort_runs, RunFilter, RunOrder, RunRecord, RunRegistry};
use crate::error::{RecastError, Result};

#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    runs: Mutex<BTreeMap<Uuid, RunRecord>>,
    artifacts: Mutex<BTreeMap<(Uuid, String), serde_json::Value>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pre-built record, e.g. to seed incumbent runs with fixed
    /// timestamps.
    pub fn seed_run(&self, run: RunRecord) -> Result<()> {
        self.with_runs(|runs| {
            runs.insert(run.run_id, run);
        })
    }

    /// Fetch a logged artifact payload.
    pub fn artifact(&self, run_id: Uuid, name: &str) -> Result<Option<serde_json::Value>> {
        let artifacts = self
            .artifacts
            .lock()
            .map_err(|_| RecastError::Internal("registry mutex poisoned".to_string()))?;
        Ok(artifacts.get(&(run_id, name.to_string())).cloned())
    }

    fn with_runs<T>(&self, apply: impl FnOnce(&mut BTreeMap<Uuid, RunRecord>) -> T) -> Result<T> {
        let mut runs = self
            .runs
            .lock()
            .map_err(|_| RecastError::Internal("registry mutex poisoned".to_string()))?;
        Ok(apply(&mut runs))
    }

    fn update<F: FnOnce(&mut RunRecord)>(&self, run_id: Uuid, apply: F) -> Result<()> {
        self.with_runs(|runs| match runs.get_mut(&run_id) {
            Some(run) => {
                apply(run);
                Ok(())
            }
            None => Err(RecastError::RunNotFound(run_id.to_string())),
        })?
    }
}

impl RunRegistry for InMemoryRegistry {
    fn create_run(&self, experiment: &str) -> Result<RunRecord> {
        let run = RunRecord::new(experiment);
        self.with_runs(|runs| {
            runs.insert(run.run_id, run.clone());
        })?;
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
        self.update(run_id, |run| {
            if !run.artifacts.iter().any(|a| a == name) {
                run.artifacts.push(name.to_string());
            }
        })?;
        let mut artifacts = self
            .artifacts
            .lock()
            .map_err(|_| RecastError::Internal("registry mutex poisoned".to_string()))?;
        artifacts.insert((run_id, name.to_string()), payload.clone());
        Ok(())
    }

    fn get_run(&self, run_id: Uuid) -> Result<RunRecord> {
        self.with_runs(|runs| {
            runs.get(&run_id)
                .cloned()
                .ok_or_else(|| RecastError::RunNotFound(run_id.to_string()))
        })?
    }

    fn query_runs(
        &self,
        filter: &RunFilter,
        order: RunOrder,
        limit: usize,
    ) -> Result<Vec<RunRecord>> {
        let mut runs = self.with_runs(|runs| {
            runs.values()
                .filter(|run| filter.matches(run))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        sort_runs(&mut runs, order);
        if limit > 0 {
            runs.truncate(limit);
        }
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behaves_like_a_registry() {
        let registry = InMemoryRegistry::new();
        let run = registry.create_run("forecast-ct").unwrap();
        registry.log_metric(run.run_id, "test_rmse", 0.9).unwrap();
        registry.set_tag(run.run_id, "kpi_status", "PASS").unwrap();
        registry
            .log_artifact(run.run_id, "model.json", &serde_json::json!({"base": 1.0}))
            .unwrap();

        let loaded = registry.get_run(run.run_id).unwrap();
        assert_eq!(loaded.metric("test_rmse"), Some(0.9));
        assert_eq!(loaded.artifacts, vec!["model.json"]);
        assert_eq!(
            registry.artifact(run.run_id, "model.json").unwrap(),
            Some(serde_json::json!({"base": 1.0}))
        );

        let runs = registry
            .query_runs(
                &RunFilter::new().tag("kpi_status", "PASS"),
                RunOrder::TestRmseAsc,
                0,
            )
            .unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[test]
    fn unknown_run_is_not_found() {
        let registry = InMemoryRegistry::new();
        assert!(matches!(
            registry.log_metric(Uuid::new_v4(), "x", 1.0).unwrap_err(),
            RecastError::RunNotFound(_)
        ));
    }
}
