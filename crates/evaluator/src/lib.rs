//! Deterministic evaluator for the lexrag pipeline.
//!
//! A rule engine over one message's evidence chain: retrieval hits, the
//! generated answer, and its aligned citations. The engine never calls
//! retrieval or generation itself; every check is a pure function and the
//! verdict is byte-identical for identical input. `rule_version` is pinned
//! and persisted together with the full config snapshot so any verdict can
//! be replayed.
//!
//! Verdict aggregation: any `fail` → `fail`; any `warn` without `fail` →
//! `partial`; all checks `skipped` → `skipped`; otherwise `pass`.

mod checks;

use gate::{GateCheck, GateStatus};
use serde::{Deserialize, Serialize};
use store::{Citation, RetrievalHit};

/// Bump when a rule's behavior changes; persisted on every record.
pub const RULE_VERSION: &str = "legal-qa-rules/v1";

/// Evaluator thresholds; the full snapshot is persisted with each record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluatorConfig {
    #[serde(default = "default_require_citations")]
    pub require_citations: bool,
    #[serde(default = "default_coverage_warn")]
    pub citation_coverage_warn: f32,
    #[serde(default = "default_coverage_fail")]
    pub citation_coverage_fail: f32,
    #[serde(default = "default_min_answer_chars")]
    pub min_answer_chars: usize,
}

fn default_require_citations() -> bool {
    true
}

fn default_coverage_warn() -> f32 {
    0.8
}

fn default_coverage_fail() -> f32 {
    0.5
}

fn default_min_answer_chars() -> usize {
    20
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            require_citations: default_require_citations(),
            citation_coverage_warn: default_coverage_warn(),
            citation_coverage_fail: default_coverage_fail(),
            min_answer_chars: default_min_answer_chars(),
        }
    }
}

/// Everything the evaluator sees; it reads, it never fetches.
#[derive(Debug, Clone, Copy)]
pub struct EvaluatorInput<'a> {
    pub hits: &'a [RetrievalHit],
    pub answer: Option<&'a str>,
    pub citations: &'a [Citation],
}

/// The verdict plus everything needed to persist and replay it.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub status: GateStatus,
    pub checks: Vec<GateCheck>,
    pub scores: serde_json::Value,
    pub rule_version: &'static str,
}

/// Run all checks and aggregate. Pure: identical input gives identical
/// output, including check order.
pub fn evaluate(input: &EvaluatorInput<'_>, cfg: &EvaluatorConfig) -> EvaluationOutcome {
    let checks = vec![
        checks::require_citations(input, cfg),
        checks::citation_coverage(input, cfg),
        checks::min_answer_length(input, cfg),
        checks::no_empty_answer(input),
    ];
    let status = gate::aggregate(&checks);
    let scores = serde_json::json!({
        "citation_coverage": checks::citation_coverage_value(input),
    });
    EvaluationOutcome {
        status,
        checks,
        scores,
        rule_version: RULE_VERSION,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate::CheckStatus;
    use serde_json::json;
    use store::HitSource;
    use uuid::Uuid;

    fn hit(node: u128) -> RetrievalHit {
        RetrievalHit {
            retrieval_record_id: Uuid::nil(),
            node_id: Uuid::from_u128(node),
            source: HitSource::Fused,
            rank: 1,
            score: 0.8,
            score_details: json!({}),
            excerpt: "excerpt".into(),
            page: 1,
            start_offset: None,
            end_offset: None,
        }
    }

    fn citation(node: u128) -> Citation {
        Citation {
            node_id: Uuid::from_u128(node),
            rank: Some(1),
            quote: None,
            page: Some(1),
            article_id: None,
            section_path: None,
            locator: None,
        }
    }

    const ANSWER: &str = "The deposit may not exceed three months of rent.";

    #[test]
    fn grounded_answer_passes() {
        let hits = vec![hit(1), hit(2)];
        let citations = vec![citation(1), citation(2)];
        let outcome = evaluate(
            &EvaluatorInput {
                hits: &hits,
                answer: Some(ANSWER),
                citations: &citations,
            },
            &EvaluatorConfig::default(),
        );
        assert_eq!(outcome.status, GateStatus::Pass);
        assert_eq!(outcome.rule_version, RULE_VERSION);
        assert_eq!(outcome.scores["citation_coverage"], 1.0);
    }

    #[test]
    fn missing_citations_fail_the_verdict() {
        let hits = vec![hit(1)];
        let outcome = evaluate(
            &EvaluatorInput {
                hits: &hits,
                answer: Some(ANSWER),
                citations: &[],
            },
            &EvaluatorConfig::default(),
        );
        // Invariant: a require_citations failure makes the overall verdict fail.
        assert_eq!(outcome.status, GateStatus::Fail);
        let check = outcome.checks.iter().find(|c| c.name == "require_citations").unwrap();
        assert_eq!(check.status, CheckStatus::Fail);
    }

    #[test]
    fn partial_coverage_warns() {
        let hits = vec![hit(1)];
        // 2 of 3 citations inside the hit set -> coverage 0.33 < fail 0.5.
        let citations = vec![citation(1), citation(7), citation(8)];
        let outcome = evaluate(
            &EvaluatorInput {
                hits: &hits,
                answer: Some(ANSWER),
                citations: &citations,
            },
            &EvaluatorConfig::default(),
        );
        assert_eq!(outcome.status, GateStatus::Fail);

        // 3 of 4 inside -> 0.75: above fail, below warn -> partial.
        let citations = vec![citation(1), citation(1), citation(1), citation(9)];
        let hits = vec![hit(1)];
        let outcome = evaluate(
            &EvaluatorInput {
                hits: &hits,
                answer: Some(ANSWER),
                citations: &citations,
            },
            &EvaluatorConfig::default(),
        );
        assert_eq!(outcome.status, GateStatus::Partial);
    }

    #[test]
    fn coverage_stays_in_unit_interval() {
        let hits = vec![hit(1)];
        let citations = vec![citation(1), citation(2), citation(3)];
        let outcome = evaluate(
            &EvaluatorInput {
                hits: &hits,
                answer: Some(ANSWER),
                citations: &citations,
            },
            &EvaluatorConfig::default(),
        );
        let coverage = outcome.scores["citation_coverage"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&coverage));
    }

    #[test]
    fn blank_answer_fails_both_answer_checks() {
        let hits = vec![hit(1)];
        let citations = vec![citation(1)];
        let outcome = evaluate(
            &EvaluatorInput {
                hits: &hits,
                answer: Some("   "),
                citations: &citations,
            },
            &EvaluatorConfig::default(),
        );
        assert_eq!(outcome.status, GateStatus::Fail);
        assert!(outcome
            .checks
            .iter()
            .filter(|c| c.name == "min_answer_length" || c.name == "no_empty_answer")
            .all(|c| c.status == CheckStatus::Fail));
    }

    #[test]
    fn disabled_citation_rules_can_skip() {
        let cfg = EvaluatorConfig {
            require_citations: false,
            ..Default::default()
        };
        let outcome = evaluate(
            &EvaluatorInput {
                hits: &[],
                answer: Some(ANSWER),
                citations: &[],
            },
            &cfg,
        );
        let require = outcome.checks.iter().find(|c| c.name == "require_citations").unwrap();
        assert_eq!(require.status, CheckStatus::Skipped);
        let coverage = outcome.checks.iter().find(|c| c.name == "citation_coverage").unwrap();
        assert_eq!(coverage.status, CheckStatus::Skipped);
        assert_eq!(outcome.status, GateStatus::Pass);
    }

    #[test]
    fn identical_input_gives_byte_identical_outcome() {
        let hits = vec![hit(1), hit(2)];
        let citations = vec![citation(1), citation(5)];
        let input = EvaluatorInput {
            hits: &hits,
            answer: Some(ANSWER),
            citations: &citations,
        };
        let cfg = EvaluatorConfig::default();
        let a = evaluate(&input, &cfg);
        let b = evaluate(&input, &cfg);
        assert_eq!(
            serde_json::to_string(&a.checks).unwrap(),
            serde_json::to_string(&b.checks).unwrap()
        );
        assert_eq!(a.status, b.status);
        assert_eq!(a.scores.to_string(), b.scores.to_string());
    }
}
