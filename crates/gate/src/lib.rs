//! Gate kernel for the lexrag pipeline.
//!
//! Every pipeline stage (ingest, retrieval, generation, evaluation) computes a
//! flat list of [`GateCheck`] results; this crate owns the aggregation of those
//! checks into a [`GateReport`] and the causal chain that decides whether a
//! downstream stage may run. Stages never call gates and gates never call
//! stages, so the trust graph stays acyclic.
//!
//! Gate logic is deterministic and performs no I/O. Two invocations with the
//! same checks produce the same report.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate verdict of a gate over one stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Pass,
    Partial,
    Fail,
    Skipped,
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GateStatus::Pass => "pass",
            GateStatus::Partial => "partial",
            GateStatus::Fail => "fail",
            GateStatus::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Outcome of a single stage-level check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Skipped,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Fail => "fail",
            CheckStatus::Warn => "warn",
            CheckStatus::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// A named check computed by a stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateCheck {
    pub name: String,
    pub status: CheckStatus,
    /// Optional human-readable context (threshold values, counts, reasons).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl GateCheck {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Pass,
            detail: None,
        }
    }

    pub fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Fail,
            detail: Some(detail.into()),
        }
    }

    pub fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: Some(detail.into()),
        }
    }

    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Skipped,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Pipeline stage guarded by a gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ingest,
    Retrieval,
    Generation,
    Evaluation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Ingest => "ingest",
            Stage::Retrieval => "retrieval",
            Stage::Generation => "generation",
            Stage::Evaluation => "evaluation",
        };
        f.write_str(name)
    }
}

/// Stage report: the checks a stage computed plus the kernel's verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateReport {
    /// Gate name, conventionally the stage name.
    pub name: String,
    pub status: GateStatus,
    /// Why the gate did not pass cleanly; empty on `pass`.
    pub reasons: Vec<String>,
    pub checks: Vec<GateCheck>,
}

impl GateReport {
    /// Aggregate a stage's checks into a verdict.
    ///
    /// Rules: any `fail` check fails the gate; any `warn` with no `fail`
    /// yields `partial`; all checks `skipped` yields `skipped`; otherwise
    /// `pass`. An empty check list is treated as `skipped`.
    pub fn from_checks(stage: Stage, checks: Vec<GateCheck>) -> Self {
        let status = aggregate(&checks);
        let reasons = checks
            .iter()
            .filter(|c| matches!(c.status, CheckStatus::Fail | CheckStatus::Warn))
            .map(|c| match &c.detail {
                Some(detail) => format!("{}: {detail}", c.name),
                None => c.name.clone(),
            })
            .collect();
        Self {
            name: stage.to_string(),
            status,
            reasons,
            checks,
        }
    }

    /// A gate that never ran because an upstream gate blocked it.
    pub fn skipped(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            name: stage.to_string(),
            status: GateStatus::Skipped,
            reasons: vec![reason.into()],
            checks: Vec::new(),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == GateStatus::Pass
    }

    pub fn failed(&self) -> bool {
        self.status == GateStatus::Fail
    }
}

/// Verdict aggregation shared by gates and the evaluator.
pub fn aggregate(checks: &[GateCheck]) -> GateStatus {
    if checks.is_empty() || checks.iter().all(|c| c.status == CheckStatus::Skipped) {
        return GateStatus::Skipped;
    }
    if checks.iter().any(|c| c.status == CheckStatus::Fail) {
        return GateStatus::Fail;
    }
    if checks.iter().any(|c| c.status == CheckStatus::Warn) {
        return GateStatus::Partial;
    }
    GateStatus::Pass
}

/// Causal chain: may the stage after `stage` run given this gate status?
///
/// Ingest `fail` blocks retrieval over the failed file; retrieval `fail`
/// blocks generation; generation `fail` does *not* block evaluation (the
/// evaluator must be able to record the failure); evaluation `fail` blocks
/// the user-visible answer.
pub fn downstream_permitted(stage: Stage, status: GateStatus) -> bool {
    match stage {
        Stage::Generation => true,
        Stage::Ingest | Stage::Retrieval | Stage::Evaluation => status != GateStatus::Fail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_pass_aggregates_to_pass() {
        let report = GateReport::from_checks(
            Stage::Retrieval,
            vec![GateCheck::pass("keyword_recall"), GateCheck::pass("vector_recall")],
        );
        assert_eq!(report.status, GateStatus::Pass);
        assert!(report.reasons.is_empty());
        assert!(report.passed());
    }

    #[test]
    fn any_fail_wins_over_warn() {
        let report = GateReport::from_checks(
            Stage::Retrieval,
            vec![
                GateCheck::warn("vector_recall", "provider degraded"),
                GateCheck::fail("evidence_found", "no candidates"),
            ],
        );
        assert_eq!(report.status, GateStatus::Fail);
        assert_eq!(report.reasons.len(), 2);
        assert!(report.reasons[1].contains("no candidates"));
    }

    #[test]
    fn warn_without_fail_is_partial() {
        let report = GateReport::from_checks(
            Stage::Generation,
            vec![GateCheck::pass("output_parsed"), GateCheck::warn("citations_aligned", "1 dropped")],
        );
        assert_eq!(report.status, GateStatus::Partial);
    }

    #[test]
    fn all_skipped_is_skipped() {
        let report = GateReport::from_checks(
            Stage::Evaluation,
            vec![GateCheck::skipped("require_citations"), GateCheck::skipped("min_answer_length")],
        );
        assert_eq!(report.status, GateStatus::Skipped);
    }

    #[test]
    fn empty_checks_is_skipped() {
        assert_eq!(aggregate(&[]), GateStatus::Skipped);
    }

    #[test]
    fn causal_chain_matches_contract() {
        assert!(!downstream_permitted(Stage::Ingest, GateStatus::Fail));
        assert!(!downstream_permitted(Stage::Retrieval, GateStatus::Fail));
        // Generation failure must still let the evaluator record the failure.
        assert!(downstream_permitted(Stage::Generation, GateStatus::Fail));
        assert!(!downstream_permitted(Stage::Evaluation, GateStatus::Fail));

        assert!(downstream_permitted(Stage::Retrieval, GateStatus::Partial));
        assert!(downstream_permitted(Stage::Retrieval, GateStatus::Pass));
    }

    #[test]
    fn report_serde_roundtrip() {
        let report = GateReport::from_checks(
            Stage::Ingest,
            vec![GateCheck::pass("nodes_nonempty"), GateCheck::fail("vector_count", "12 != 13")],
        );
        let json = serde_json::to_string(&report).unwrap();
        let back: GateReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report, back);
        assert!(json.contains("\"fail\""));
    }

    #[test]
    fn deterministic_for_same_checks() {
        let checks = vec![
            GateCheck::warn("citation_coverage", "0.50 below warn threshold 0.80"),
            GateCheck::pass("no_empty_answer"),
        ];
        let a = GateReport::from_checks(Stage::Evaluation, checks.clone());
        let b = GateReport::from_checks(Stage::Evaluation, checks);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
