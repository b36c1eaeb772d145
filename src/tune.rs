//! Hyperparameter grid search over one dataset version.
//!
//! The grid is the cartesian product of the configured value lists,
//! enumerated in declared field order (n_estimators outermost,
//! min_samples_split innermost). Every configuration records its own run;
//! the model artifact is only logged when a configuration strictly beats
//! the best test RMSE seen so far, so ties keep the first winner.

use tracing::info;
use uuid::Uuid;

use crate::config::TuningConfig;
use crate::dataset::{expanding_folds, Dataset};
use crate::error::Result;
use crate::kpi::{self, KpiThresholds};
use crate::metrics::{compute_metrics, CvMetrics, MetricSet};
use crate::model::{build_backend, Hyperparameters, ModelType};
use crate::registry::{
    RunRegistry, DATA_VERSION_TAG, KPI_STATUS_TAG, MODEL_TYPE_TAG, TEST_MAE_KEY, TEST_R2_KEY,
    TEST_RMSE_KEY,
};
use crate::trainer::MODEL_ARTIFACT;

/// Winner of a grid search.
#[derive(Debug, Clone)]
pub struct TuneOutcome {
    pub best_run_id: Uuid,
    pub best_rmse: f64,
    pub best_hyperparameters: Hyperparameters,
    pub evaluated: usize,
}

pub struct Tuner<'a> {
    registry: &'a dyn RunRegistry,
    experiment: String,
    thresholds: KpiThresholds,
    test_fraction: f64,
    grid: TuningConfig,
    base: Hyperparameters,
    expected_features: Vec<String>,
}

impl<'a> Tuner<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: &'a dyn RunRegistry,
        experiment: &str,
        thresholds: KpiThresholds,
        test_fraction: f64,
        grid: TuningConfig,
        base: Hyperparameters,
        expected_features: Vec<String>,
    ) -> Self {
        Self {
            registry,
            experiment: experiment.to_string(),
            thresholds,
            test_fraction,
            grid,
            base,
            expected_features,
        }
    }

    /// Run the full grid against one dataset and return the winner.
    pub fn tune(
        &self,
        data_version: &str,
        dataset_path: &str,
        model_type: ModelType,
    ) -> Result<TuneOutcome> {
        let dataset = Dataset::from_csv(dataset_path, &self.expected_features)?;
        let (train_ds, test_ds) = dataset.temporal_split(self.test_fraction)?;
        let total = self.grid.grid_size();
        info!(
            version = %data_version,
            model = %model_type,
            configurations = total,
            "grid search started"
        );

        let mut best: Option<(Uuid, f64, Hyperparameters)> = None;
        let mut evaluated = 0usize;
        for &n_estimators in &self.grid.n_estimators {
            for &max_depth in &self.grid.max_depth {
                for &learning_rate in &self.grid.learning_rate {
                    for &min_samples_split in &self.grid.min_samples_split {
                        let hp = Hyperparameters {
                            n_estimators,
                            max_depth,
                            learning_rate,
                            min_samples_split,
                            ..self.base
                        };
                        evaluated += 1;
                        let (run_id, test, artifact) = self.evaluate_config(
                            data_version,
                            model_type,
                            &hp,
                            &train_ds,
                            &test_ds,
                        )?;
                        info!(
                            configuration = evaluated,
                            total,
                            test_rmse = test.rmse,
                            "configuration evaluated"
                        );

                        // Strict improvement only; ties keep the first winner
                        // and skip the artifact.
                        let improved = best
                            .as_ref()
                            .map_or(true, |(_, best_rmse, _)| test.rmse < *best_rmse);
                        if improved {
                            self.registry.log_artifact(run_id, MODEL_ARTIFACT, &artifact)?;
                            best = Some((run_id, test.rmse, hp));
                        }
                    }
                }
            }
        }

        // grid_size() >= 1 is enforced by config validation.
        let (best_run_id, best_rmse, best_hyperparameters) = best.ok_or_else(|| {
            crate::error::RecastError::InvalidConfig("tuning grid is empty".to_string())
        })?;

        self.registry
            .set_tag(best_run_id, "tuning_best", "true")?;
        info!(
            run_id = %best_run_id,
            best_rmse,
            evaluated,
            "grid search finished"
        );
        Ok(TuneOutcome {
            best_run_id,
            best_rmse,
            best_hyperparameters,
            evaluated,
        })
    }

    fn evaluate_config(
        &self,
        data_version: &str,
        model_type: ModelType,
        hp: &Hyperparameters,
        train_ds: &Dataset,
        test_ds: &Dataset,
    ) -> Result<(Uuid, MetricSet, serde_json::Value)> {
        let mut backend = build_backend(model_type, hp);
        backend.fit(&train_ds.features, &train_ds.target)?;
        let preds = backend.predict(&test_ds.features)?;
        let test = compute_metrics(&test_ds.target, &preds)?;

        // Per-configuration stability estimate over the training partition.
        let mut per_fold = Vec::new();
        for (fit_range, val_range) in expanding_folds(train_ds.len(), self.grid.cv_folds) {
            let fit = train_ds.subset(fit_range);
            let val = train_ds.subset(val_range);
            let mut fold_backend = build_backend(model_type, hp);
            fold_backend.fit(&fit.features, &fit.target)?;
            let fold_preds = fold_backend.predict(&val.features)?;
            per_fold.push(compute_metrics(&val.target, &fold_preds)?);
        }
        let cv = CvMetrics::aggregate(&per_fold);

        let run = self.registry.create_run(&self.experiment)?;
        let id = run.run_id;
        for (key, value) in hp.to_params() {
            self.registry.log_param(id, &key, &value)?;
        }
        self.registry
            .set_tag(id, DATA_VERSION_TAG, data_version)?;
        self.registry
            .set_tag(id, MODEL_TYPE_TAG, model_type.as_tag())?;
        self.registry.set_tag(id, "tuning", "true")?;
        self.registry.log_metric(id, TEST_RMSE_KEY, test.rmse)?;
        self.registry.log_metric(id, TEST_MAE_KEY, test.mae)?;
        self.registry.log_metric(id, TEST_R2_KEY, test.r2)?;
        if let Some(cv) = cv {
            self.registry.log_metric(id, "cv_rmse_mean", cv.rmse_mean)?;
            self.registry.log_metric(id, "cv_rmse_std", cv.rmse_std)?;
        }
        let status = kpi::evaluate(&test, &self.thresholds);
        self.registry.set_tag(id, KPI_STATUS_TAG, status.as_tag())?;

        Ok((id, test, backend.to_artifact()?))
    }
}
