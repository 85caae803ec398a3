//! Baseline rule checks. Each check is a pure function over the evaluator
//! input; no clock, no randomness, no I/O.

use gate::GateCheck;
use std::collections::HashSet;
use uuid::Uuid;

use crate::{EvaluatorConfig, EvaluatorInput};

pub(crate) fn require_citations(input: &EvaluatorInput<'_>, cfg: &EvaluatorConfig) -> GateCheck {
    if !cfg.require_citations {
        return GateCheck::skipped("require_citations");
    }
    if input.citations.is_empty() {
        GateCheck::fail("require_citations", "answer carries no citations")
    } else {
        GateCheck::pass("require_citations").with_detail(format!("{} citations", input.citations.len()))
    }
}

/// Share of citations whose node is actually in the hit set; always in
/// `[0, 1]`.
pub(crate) fn citation_coverage_value(input: &EvaluatorInput<'_>) -> Option<f32> {
    if input.citations.is_empty() {
        return None;
    }
    let hit_nodes: HashSet<Uuid> = input.hits.iter().map(|h| h.node_id).collect();
    let cited: HashSet<Uuid> = input.citations.iter().map(|c| c.node_id).collect();
    let covered = cited.iter().filter(|id| hit_nodes.contains(id)).count();
    Some(covered as f32 / input.citations.len().max(1) as f32)
}

pub(crate) fn citation_coverage(input: &EvaluatorInput<'_>, cfg: &EvaluatorConfig) -> GateCheck {
    let Some(coverage) = citation_coverage_value(input) else {
        return GateCheck::skipped("citation_coverage").with_detail("no citations to cover");
    };
    let detail = format!(
        "coverage {coverage:.2} (warn < {:.2}, fail < {:.2})",
        cfg.citation_coverage_warn, cfg.citation_coverage_fail
    );
    if coverage < cfg.citation_coverage_fail {
        GateCheck::fail("citation_coverage", detail)
    } else if coverage < cfg.citation_coverage_warn {
        GateCheck::warn("citation_coverage", detail)
    } else {
        GateCheck::pass("citation_coverage").with_detail(detail)
    }
}

pub(crate) fn min_answer_length(input: &EvaluatorInput<'_>, cfg: &EvaluatorConfig) -> GateCheck {
    let length = input
        .answer
        .map(|a| a.trim().chars().count())
        .unwrap_or(0);
    if length >= cfg.min_answer_chars {
        GateCheck::pass("min_answer_length").with_detail(format!("{length} chars"))
    } else {
        GateCheck::fail(
            "min_answer_length",
            format!("{length} chars below minimum {}", cfg.min_answer_chars),
        )
    }
}

pub(crate) fn no_empty_answer(input: &EvaluatorInput<'_>) -> GateCheck {
    match input.answer {
        Some(answer) if !answer.trim().is_empty() => GateCheck::pass("no_empty_answer"),
        _ => GateCheck::fail("no_empty_answer", "answer is blank"),
    }
}
