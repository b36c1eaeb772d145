//! Training one model on one dataset version, end to end.
//!
//! The trainer loads the gold CSV, makes the temporal split, fits the
//! requested backend, scores both partitions, runs walk-forward
//! cross-validation on the training partition, applies the KPI gate and
//! records everything as a registry run. A degenerate model (non-finite
//! predictions) still produces a FAIL-tagged run before the error
//! propagates, so the registry keeps a trace of what went wrong.

use tracing::{info, warn};

use crate::dataset::{expanding_folds, Dataset};
use crate::error::Result;
use crate::kpi::{self, KpiStatus, KpiThresholds};
use crate::metrics::{compute_metrics, CvMetrics, MetricSet};
use crate::model::{build_backend, Hyperparameters, ModelType};
use crate::registry::{
    RunRecord, RunRegistry, DATA_VERSION_TAG, KPI_STATUS_TAG, MODEL_TYPE_TAG, TEST_MAE_KEY,
    TEST_R2_KEY, TEST_RMSE_KEY,
};

pub const MODEL_ARTIFACT: &str = "model.json";
pub const FEATURES_ARTIFACT: &str = "features.json";

/// What to train on which data.
#[derive(Debug, Clone)]
pub struct TrainRequest {
    pub data_version: String,
    pub dataset_path: String,
    pub model_type: ModelType,
    pub hyperparameters: Hyperparameters,
}

/// Result of one completed training run.
#[derive(Debug, Clone)]
pub struct TrainingRun {
    pub record: RunRecord,
    pub train: MetricSet,
    pub test: MetricSet,
    pub cv: Option<CvMetrics>,
    pub kpi_status: KpiStatus,
}

pub struct Trainer<'a> {
    registry: &'a dyn RunRegistry,
    experiment: String,
    thresholds: KpiThresholds,
    test_fraction: f64,
    cv_folds: usize,
    expected_features: Vec<String>,
}

struct Scores {
    train: MetricSet,
    test: MetricSet,
    cv: Option<CvMetrics>,
    artifact: serde_json::Value,
}

impl<'a> Trainer<'a> {
    pub fn new(
        registry: &'a dyn RunRegistry,
        experiment: &str,
        thresholds: KpiThresholds,
        test_fraction: f64,
        cv_folds: usize,
        expected_features: Vec<String>,
    ) -> Self {
        Self {
            registry,
            experiment: experiment.to_string(),
            thresholds,
            test_fraction,
            cv_folds,
            expected_features,
        }
    }

    /// Train, evaluate and record one run.
    pub fn train(&self, request: &TrainRequest) -> Result<TrainingRun> {
        let dataset = Dataset::from_csv(&request.dataset_path, &self.expected_features)?;
        let (train_ds, test_ds) = dataset.temporal_split(self.test_fraction)?;
        info!(
            version = %request.data_version,
            model = %request.model_type,
            train_rows = train_ds.len(),
            test_rows = test_ds.len(),
            features = dataset.feature_names.len(),
            "training started"
        );

        let run = self.registry.create_run(&self.experiment)?;
        self.log_setup(&run, request, &train_ds, &test_ds)?;

        let scores = match self.fit_and_score(request, &train_ds, &test_ds) {
            Ok(scores) => scores,
            Err(e) => {
                self.mark_failed(&run, &e.to_string());
                return Err(e);
            }
        };

        let kpi_status = kpi::evaluate(&scores.test, &self.thresholds);
        self.log_scores(&run, &scores, kpi_status)?;
        self.registry
            .log_artifact(run.run_id, MODEL_ARTIFACT, &scores.artifact)?;
        self.registry.log_artifact(
            run.run_id,
            FEATURES_ARTIFACT,
            &serde_json::json!({ "feature_names": dataset.feature_names }),
        )?;

        info!(
            run_id = %run.run_id,
            version = %request.data_version,
            test_rmse = scores.test.rmse,
            test_mae = scores.test.mae,
            test_r2 = scores.test.r2,
            kpi = %kpi_status,
            "training finished"
        );

        Ok(TrainingRun {
            record: self.registry.get_run(run.run_id)?,
            train: scores.train,
            test: scores.test,
            cv: scores.cv,
            kpi_status,
        })
    }

    fn fit_and_score(
        &self,
        request: &TrainRequest,
        train_ds: &Dataset,
        test_ds: &Dataset,
    ) -> Result<Scores> {
        let mut backend = build_backend(request.model_type, &request.hyperparameters);
        backend.fit(&train_ds.features, &train_ds.target)?;

        let train_preds = backend.predict(&train_ds.features)?;
        let train = compute_metrics(&train_ds.target, &train_preds)?;
        let test_preds = backend.predict(&test_ds.features)?;
        let test = compute_metrics(&test_ds.target, &test_preds)?;

        let cv = self.cross_validate(request, train_ds)?;

        Ok(Scores {
            train,
            test,
            cv,
            artifact: backend.to_artifact()?,
        })
    }

    /// Walk-forward validation over the training partition. Small
    /// partitions reduce the fold count; none usable means no CV metrics.
    fn cross_validate(&self, request: &TrainRequest, train_ds: &Dataset) -> Result<Option<CvMetrics>> {
        let folds = expanding_folds(train_ds.len(), self.cv_folds);
        if folds.is_empty() {
            warn!(
                rows = train_ds.len(),
                requested_folds = self.cv_folds,
                "training partition too small for cross-validation"
            );
            return Ok(None);
        }

        let mut per_fold = Vec::with_capacity(folds.len());
        for (fit_range, val_range) in folds {
            let fit = train_ds.subset(fit_range);
            let val = train_ds.subset(val_range);
            let mut backend = build_backend(request.model_type, &request.hyperparameters);
            backend.fit(&fit.features, &fit.target)?;
            let preds = backend.predict(&val.features)?;
            per_fold.push(compute_metrics(&val.target, &preds)?);
        }
        Ok(CvMetrics::aggregate(&per_fold))
    }

    fn log_setup(
        &self,
        run: &RunRecord,
        request: &TrainRequest,
        train_ds: &Dataset,
        test_ds: &Dataset,
    ) -> Result<()> {
        for (key, value) in request.hyperparameters.to_params() {
            self.registry.log_param(run.run_id, &key, &value)?;
        }
        self.registry
            .log_param(run.run_id, "test_fraction", &self.test_fraction.to_string())?;
        self.registry
            .log_param(run.run_id, "cv_folds", &self.cv_folds.to_string())?;

        self.registry
            .set_tag(run.run_id, DATA_VERSION_TAG, &request.data_version)?;
        self.registry
            .set_tag(run.run_id, MODEL_TYPE_TAG, request.model_type.as_tag())?;
        self.registry.set_tag(
            run.run_id,
            "n_features",
            &train_ds.feature_names.len().to_string(),
        )?;
        self.registry
            .set_tag(run.run_id, "train_rows", &train_ds.len().to_string())?;
        self.registry
            .set_tag(run.run_id, "test_rows", &test_ds.len().to_string())?;

        // Partitions are non-empty by construction of the temporal split.
        if let (Some(first), Some(last)) = (train_ds.dates.first(), train_ds.dates.last()) {
            self.registry
                .set_tag(run.run_id, "train_start", &first.to_string())?;
            self.registry
                .set_tag(run.run_id, "train_end", &last.to_string())?;
        }
        if let (Some(first), Some(last)) = (test_ds.dates.first(), test_ds.dates.last()) {
            self.registry
                .set_tag(run.run_id, "test_start", &first.to_string())?;
            self.registry
                .set_tag(run.run_id, "test_end", &last.to_string())?;
        }
        Ok(())
    }

    fn log_scores(&self, run: &RunRecord, scores: &Scores, kpi_status: KpiStatus) -> Result<()> {
        let id = run.run_id;
        self.registry.log_metric(id, "train_rmse", scores.train.rmse)?;
        self.registry.log_metric(id, "train_mae", scores.train.mae)?;
        self.registry.log_metric(id, "train_r2", scores.train.r2)?;
        self.registry.log_metric(id, TEST_RMSE_KEY, scores.test.rmse)?;
        self.registry.log_metric(id, TEST_MAE_KEY, scores.test.mae)?;
        self.registry.log_metric(id, TEST_R2_KEY, scores.test.r2)?;
        if let Some(cv) = &scores.cv {
            self.registry.log_metric(id, "cv_rmse_mean", cv.rmse_mean)?;
            self.registry.log_metric(id, "cv_rmse_std", cv.rmse_std)?;
            self.registry.log_metric(id, "cv_mae_mean", cv.mae_mean)?;
            self.registry.log_metric(id, "cv_mae_std", cv.mae_std)?;
            self.registry.log_metric(id, "cv_r2_mean", cv.r2_mean)?;
            self.registry.log_metric(id, "cv_r2_std", cv.r2_std)?;
            self.registry
                .set_tag(id, "cv_folds_used", &cv.folds.to_string())?;
        }
        self.registry
            .set_tag(id, KPI_STATUS_TAG, kpi_status.as_tag())?;
        Ok(())
    }

    fn mark_failed(&self, run: &RunRecord, reason: &str) {
        if let Err(e) = self
            .registry
            .set_tag(run.run_id, KPI_STATUS_TAG, KpiStatus::Fail.as_tag())
            .and_then(|()| self.registry.set_tag(run.run_id, "failure_reason", reason))
        {
            warn!(run_id = %run.run_id, error = %e, "could not mark run as failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use std::io::Write;

    // Tree ensembles cannot extrapolate the trend into the held-out tail,
    // so the gate bounds are generous on purpose.
    fn thresholds() -> KpiThresholds {
        KpiThresholds {
            rmse_acceptable: 25.0,
            mae_acceptable: 25.0,
            r2_minimum: -20.0,
        }
    }

    fn gold_csv(rows: usize) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(f, "date,x,target").unwrap();
        for i in 0..rows {
            writeln!(
                f,
                "2024-{:02}-{:02},{}.0,{}.0",
                i / 28 + 1,
                i % 28 + 1,
                i,
                2 * i + 1
            )
            .unwrap();
        }
        f
    }

    fn request(path: &std::path::Path, model_type: ModelType) -> TrainRequest {
        TrainRequest {
            data_version: "v1".to_string(),
            dataset_path: path.display().to_string(),
            model_type,
            hyperparameters: Hyperparameters {
                n_estimators: 200,
                ..Default::default()
            },
        }
    }

    #[test]
    fn records_a_complete_run() {
        let registry = InMemoryRegistry::new();
        let trainer = Trainer::new(&registry, "forecast-ct", thresholds(), 0.2, 3, vec![]);
        let csv = gold_csv(50);
        let result = trainer
            .train(&request(csv.path(), ModelType::GradientBoosting))
            .unwrap();

        assert_eq!(result.kpi_status, KpiStatus::Pass);
        let record = &result.record;
        assert_eq!(record.tag(DATA_VERSION_TAG), Some("v1"));
        assert_eq!(record.tag(MODEL_TYPE_TAG), Some("gradient_boosting"));
        assert_eq!(record.tag(KPI_STATUS_TAG), Some("PASS"));
        assert_eq!(record.tag("n_features"), Some("1"));
        assert_eq!(record.tag("train_rows"), Some("40"));
        assert_eq!(record.tag("test_rows"), Some("10"));
        assert!(record.metric(TEST_RMSE_KEY).is_some());
        assert!(record.metric("cv_rmse_mean").is_some());
        assert!(record.artifacts.contains(&MODEL_ARTIFACT.to_string()));
        assert!(record.artifacts.contains(&FEATURES_ARTIFACT.to_string()));

        let artifact = registry
            .artifact(record.run_id, MODEL_ARTIFACT)
            .unwrap()
            .unwrap();
        assert_eq!(artifact["model_type"], "gradient_boosting");
    }

    #[test]
    fn linear_backend_fits_linear_data_well() {
        let registry = InMemoryRegistry::new();
        let trainer = Trainer::new(&registry, "forecast-ct", thresholds(), 0.2, 3, vec![]);
        let csv = gold_csv(60);
        let result = trainer
            .train(&request(csv.path(), ModelType::LinearRegression))
            .unwrap();
        assert!(result.test.rmse < 0.01);
        assert_eq!(result.kpi_status, KpiStatus::Pass);
    }

    #[test]
    fn tiny_dataset_still_records_a_run() {
        let registry = InMemoryRegistry::new();
        let trainer = Trainer::new(&registry, "forecast-ct", thresholds(), 0.2, 50, vec![]);
        let csv = gold_csv(10);
        let result = trainer
            .train(&request(csv.path(), ModelType::LinearRegression))
            .unwrap();
        // Fold count is clamped to what 8 training rows can support.
        assert!(result.record.metric(TEST_RMSE_KEY).is_some());
    }

    #[test]
    fn missing_dataset_is_data_error_without_a_run() {
        let registry = InMemoryRegistry::new();
        let trainer = Trainer::new(&registry, "forecast-ct", thresholds(), 0.2, 3, vec![]);
        let req = TrainRequest {
            data_version: "v1".to_string(),
            dataset_path: "/nonexistent/gold_v1.csv".to_string(),
            model_type: ModelType::LinearRegression,
            hyperparameters: Hyperparameters::default(),
        };
        assert!(trainer.train(&req).is_err());
        let runs = registry
            .query_runs(&Default::default(), crate::registry::RunOrder::CreatedAtDesc, 0)
            .unwrap();
        assert!(runs.is_empty());
    }
}
