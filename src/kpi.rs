//! KPI gate: PASS/FAIL decision from test metrics against fixed thresholds.
//!
//! The gate is intentionally asymmetric: RMSE and R² gate the decision,
//! MAE is computed and reported but never blocks.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::metrics::MetricSet;

/// Acceptability thresholds, fixed per pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KpiThresholds {
    pub rmse_acceptable: f64,
    pub mae_acceptable: f64,
    pub r2_minimum: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KpiStatus {
    Pass,
    Fail,
}

impl KpiStatus {
    pub fn is_pass(self) -> bool {
        self == KpiStatus::Pass
    }

    /// Tag value as stored in the run registry.
    pub fn as_tag(self) -> &'static str {
        match self {
            KpiStatus::Pass => "PASS",
            KpiStatus::Fail => "FAIL",
        }
    }
}

impl fmt::Display for KpiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Pure gate function. PASS iff test RMSE is below the acceptable bound and
/// test R² is above the minimum. MAE does not participate.
pub fn evaluate(test: &MetricSet, thresholds: &KpiThresholds) -> KpiStatus {
    let rmse_ok = test.rmse < thresholds.rmse_acceptable;
    let r2_ok = test.r2 > thresholds.r2_minimum;
    if rmse_ok && r2_ok {
        KpiStatus::Pass
    } else {
        KpiStatus::Fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> KpiThresholds {
        KpiThresholds {
            rmse_acceptable: 2.0,
            mae_acceptable: 1.0,
            r2_minimum: 0.5,
        }
    }

    #[test]
    fn mae_breach_does_not_block() {
        let test = MetricSet {
            rmse: 1.0,
            mae: 100.0,
            r2: 0.9,
        };
        assert_eq!(evaluate(&test, &thresholds()), KpiStatus::Pass);
    }

    #[test]
    fn rmse_breach_fails() {
        let test = MetricSet {
            rmse: 2.5,
            mae: 0.1,
            r2: 0.9,
        };
        assert_eq!(evaluate(&test, &thresholds()), KpiStatus::Fail);
    }

    #[test]
    fn low_r2_fails() {
        let test = MetricSet {
            rmse: 1.0,
            mae: 0.1,
            r2: 0.4,
        };
        assert_eq!(evaluate(&test, &thresholds()), KpiStatus::Fail);
    }

    #[test]
    fn boundary_values_fail() {
        // Thresholds are strict inequalities on both gates.
        let test = MetricSet {
            rmse: 2.0,
            mae: 0.1,
            r2: 0.5,
        };
        assert_eq!(evaluate(&test, &thresholds()), KpiStatus::Fail);
    }
}
