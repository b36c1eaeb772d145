//! Promotion: compare a freshly trained candidate against the incumbent.
//!
//! The incumbent is the best prior run that passed the KPI gate: lowest
//! test RMSE, ties broken toward the earliest run. Under the `strict`
//! policy a candidate is promoted only when it does not regress the
//! incumbent's test RMSE. The `threshold-lenient` policy promotes any
//! candidate that passed the gate, even when it is worse than the
//! incumbent.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use uuid::Uuid;

use crate::error::{RecastError, Result};
use crate::kpi::KpiStatus;
use crate::registry::{
    RunFilter, RunOrder, RunRecord, RunRegistry, DATA_VERSION_TAG, KPI_STATUS_TAG, TEST_MAE_KEY,
    TEST_R2_KEY, TEST_RMSE_KEY,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromotionPolicy {
    /// Promote only when the candidate's test RMSE does not regress.
    #[default]
    Strict,
    /// Promote every gate-passing candidate, regressions included.
    ThresholdLenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionOutcome {
    Promote,
    Hold,
    /// No prior gate-passing run exists; the candidate becomes the first
    /// incumbent.
    NoIncumbent,
}

impl PromotionOutcome {
    pub fn is_promotion(self) -> bool {
        matches!(self, PromotionOutcome::Promote | PromotionOutcome::NoIncumbent)
    }

    pub fn as_tag(self) -> &'static str {
        match self {
            PromotionOutcome::Promote => "PROMOTE",
            PromotionOutcome::Hold => "HOLD",
            PromotionOutcome::NoIncumbent => "NO_INCUMBENT",
        }
    }
}

impl fmt::Display for PromotionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Full comparison result, also serialized as a run artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionDecision {
    pub candidate_run_id: Uuid,
    pub incumbent_run_id: Option<Uuid>,
    /// Candidate minus incumbent; negative means the candidate improved.
    pub rmse_delta: Option<f64>,
    pub mae_delta: Option<f64>,
    pub r2_delta: Option<f64>,
    pub policy: PromotionPolicy,
    pub outcome: PromotionOutcome,
    pub reason: String,
}

impl PromotionDecision {
    pub fn to_report(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Best prior gate-passing run, excluding the candidate itself.
pub fn find_incumbent(
    registry: &dyn RunRegistry,
    experiment: &str,
    scope_version: Option<&str>,
    exclude: Uuid,
) -> Result<Option<RunRecord>> {
    let mut filter = RunFilter::new()
        .experiment(experiment)
        .tag(KPI_STATUS_TAG, KpiStatus::Pass.as_tag());
    if let Some(version) = scope_version {
        filter = filter.tag(DATA_VERSION_TAG, version);
    }
    let runs = registry.query_runs(&filter, RunOrder::TestRmseAsc, 0)?;
    Ok(runs.into_iter().find(|run| run.run_id != exclude))
}

fn delta(candidate: &RunRecord, incumbent: &RunRecord, key: &str) -> Option<f64> {
    match (candidate.metric(key), incumbent.metric(key)) {
        (Some(c), Some(i)) => Some(c - i),
        _ => None,
    }
}

/// Decide whether `candidate` replaces the incumbent.
///
/// A candidate that failed the KPI gate is always held, without touching
/// the incumbent query.
pub fn decide(
    registry: &dyn RunRegistry,
    experiment: &str,
    candidate: &RunRecord,
    policy: PromotionPolicy,
    scope_to_version: bool,
) -> Result<PromotionDecision> {
    if candidate.tag(KPI_STATUS_TAG) != Some(KpiStatus::Pass.as_tag()) {
        return Ok(PromotionDecision {
            candidate_run_id: candidate.run_id,
            incumbent_run_id: None,
            rmse_delta: None,
            mae_delta: None,
            r2_delta: None,
            policy,
            outcome: PromotionOutcome::Hold,
            reason: "candidate failed the KPI gate".to_string(),
        });
    }

    let scope_version = if scope_to_version {
        candidate.tag(DATA_VERSION_TAG)
    } else {
        None
    };
    let incumbent = find_incumbent(registry, experiment, scope_version, candidate.run_id)?;

    let decision = match incumbent {
        None => PromotionDecision {
            candidate_run_id: candidate.run_id,
            incumbent_run_id: None,
            rmse_delta: None,
            mae_delta: None,
            r2_delta: None,
            policy,
            outcome: PromotionOutcome::NoIncumbent,
            reason: "no prior gate-passing run".to_string(),
        },
        Some(incumbent) => {
            let rmse_delta = delta(candidate, &incumbent, TEST_RMSE_KEY);
            let mae_delta = delta(candidate, &incumbent, TEST_MAE_KEY);
            let r2_delta = delta(candidate, &incumbent, TEST_R2_KEY);

            let (outcome, reason) = match policy {
                PromotionPolicy::Strict => match rmse_delta {
                    Some(d) if d <= 0.0 => (
                        PromotionOutcome::Promote,
                        format!("test RMSE improved by {:.6}", -d),
                    ),
                    Some(d) => (
                        PromotionOutcome::Hold,
                        format!("test RMSE regressed by {d:.6}"),
                    ),
                    None => {
                        return Err(RecastError::Internal(format!(
                            "incumbent {} lacks a test_rmse metric",
                            incumbent.run_id
                        )));
                    }
                },
                PromotionPolicy::ThresholdLenient => (
                    PromotionOutcome::Promote,
                    "candidate passed the KPI gate under the lenient policy".to_string(),
                ),
            };

            PromotionDecision {
                candidate_run_id: candidate.run_id,
                incumbent_run_id: Some(incumbent.run_id),
                rmse_delta,
                mae_delta,
                r2_delta,
                policy,
                outcome,
                reason,
            }
        }
    };

    info!(
        candidate = %decision.candidate_run_id,
        incumbent = ?decision.incumbent_run_id,
        outcome = %decision.outcome,
        reason = %decision.reason,
        "promotion decision"
    );
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use chrono::{TimeZone, Utc};

    const EXPERIMENT: &str = "forecast-ct";

    fn seeded_run(
        registry: &InMemoryRegistry,
        rmse: f64,
        status: &str,
        version: &str,
        created_s: i64,
    ) -> RunRecord {
        let mut run = RunRecord::new(EXPERIMENT);
        run.created_at = Utc.timestamp_opt(created_s, 0).unwrap();
        run.metrics.insert(TEST_RMSE_KEY.to_string(), rmse);
        run.metrics.insert(TEST_MAE_KEY.to_string(), rmse / 2.0);
        run.metrics.insert(TEST_R2_KEY.to_string(), 0.8);
        run.tags.insert(KPI_STATUS_TAG.to_string(), status.to_string());
        run.tags
            .insert(DATA_VERSION_TAG.to_string(), version.to_string());
        registry.seed_run(run.clone()).unwrap();
        run
    }

    #[test]
    fn first_passing_candidate_has_no_incumbent() {
        let registry = InMemoryRegistry::new();
        let candidate = seeded_run(&registry, 1.0, "PASS", "v1", 100);
        let decision = decide(&registry, EXPERIMENT, &candidate, PromotionPolicy::Strict, false)
            .unwrap();
        assert_eq!(decision.outcome, PromotionOutcome::NoIncumbent);
        assert!(decision.outcome.is_promotion());
    }

    #[test]
    fn strict_promotes_on_improvement_and_holds_on_regression() {
        let registry = InMemoryRegistry::new();
        seeded_run(&registry, 1.0, "PASS", "v1", 100);

        let better = seeded_run(&registry, 0.8, "PASS", "v1", 200);
        let decision =
            decide(&registry, EXPERIMENT, &better, PromotionPolicy::Strict, false).unwrap();
        assert_eq!(decision.outcome, PromotionOutcome::Promote);
        assert!((decision.rmse_delta.unwrap() - (-0.2)).abs() < 1e-12);

        let worse = seeded_run(&registry, 1.5, "PASS", "v1", 300);
        let decision =
            decide(&registry, EXPERIMENT, &worse, PromotionPolicy::Strict, false).unwrap();
        assert_eq!(decision.outcome, PromotionOutcome::Hold);
    }

    #[test]
    fn equal_rmse_promotes_under_strict() {
        let registry = InMemoryRegistry::new();
        seeded_run(&registry, 1.0, "PASS", "v1", 100);
        let tie = seeded_run(&registry, 1.0, "PASS", "v1", 200);
        let decision =
            decide(&registry, EXPERIMENT, &tie, PromotionPolicy::Strict, false).unwrap();
        assert_eq!(decision.outcome, PromotionOutcome::Promote);
    }

    #[test]
    fn lenient_promotes_despite_regression() {
        let registry = InMemoryRegistry::new();
        seeded_run(&registry, 1.0, "PASS", "v1", 100);
        let worse = seeded_run(&registry, 1.5, "PASS", "v1", 200);
        let decision = decide(
            &registry,
            EXPERIMENT,
            &worse,
            PromotionPolicy::ThresholdLenient,
            false,
        )
        .unwrap();
        assert_eq!(decision.outcome, PromotionOutcome::Promote);
        assert!(decision.rmse_delta.unwrap() > 0.0);
    }

    #[test]
    fn failed_candidate_is_held_without_comparison() {
        let registry = InMemoryRegistry::new();
        seeded_run(&registry, 1.0, "PASS", "v1", 100);
        let failed = seeded_run(&registry, 0.1, "FAIL", "v1", 200);
        let decision =
            decide(&registry, EXPERIMENT, &failed, PromotionPolicy::Strict, false).unwrap();
        assert_eq!(decision.outcome, PromotionOutcome::Hold);
        assert!(decision.incumbent_run_id.is_none());
    }

    #[test]
    fn incumbent_is_lowest_rmse_earliest_tie() {
        let registry = InMemoryRegistry::new();
        let early = seeded_run(&registry, 1.0, "PASS", "v1", 100);
        seeded_run(&registry, 1.0, "PASS", "v1", 200);
        seeded_run(&registry, 2.0, "PASS", "v1", 50);
        seeded_run(&registry, 0.5, "FAIL", "v1", 10);

        let incumbent = find_incumbent(&registry, EXPERIMENT, None, Uuid::new_v4())
            .unwrap()
            .unwrap();
        assert_eq!(incumbent.run_id, early.run_id);
    }

    #[test]
    fn version_scope_restricts_incumbent_query() {
        let registry = InMemoryRegistry::new();
        seeded_run(&registry, 0.5, "PASS", "v1", 100);
        let candidate = seeded_run(&registry, 1.0, "PASS", "v2", 200);

        // Unscoped: the v1 run is the incumbent and strict holds.
        let decision =
            decide(&registry, EXPERIMENT, &candidate, PromotionPolicy::Strict, false).unwrap();
        assert_eq!(decision.outcome, PromotionOutcome::Hold);

        // Scoped to v2: no incumbent exists.
        let decision =
            decide(&registry, EXPERIMENT, &candidate, PromotionPolicy::Strict, true).unwrap();
        assert_eq!(decision.outcome, PromotionOutcome::NoIncumbent);
    }

    #[test]
    fn policy_tags_parse_from_kebab_case() {
        let lenient: PromotionPolicy = serde_json::from_str("\"threshold-lenient\"").unwrap();
        assert_eq!(lenient, PromotionPolicy::ThresholdLenient);
        let strict: PromotionPolicy = serde_json::from_str("\"strict\"").unwrap();
        assert_eq!(strict, PromotionPolicy::Strict);
    }
}
