//! Post-processor: strict JSON parsing and citation alignment.
//!
//! The model promised `{answer, citations:[{node_id, rank}]}`. This module
//! holds it to that: code fences are tolerated, everything else is not. A
//! citation pointing outside the current hit set is dropped, never patched.

use serde::Deserialize;
use std::collections::HashMap;
use store::{Citation, Node, RetrievalHit};
use uuid::Uuid;

/// The model's parsed output before alignment.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StructuredAnswer {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<RawCitation>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawCitation {
    pub node_id: String,
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub quote: Option<String>,
}

/// Strictly parse model output into the structured answer schema.
pub fn parse_structured(raw: &str) -> Result<StructuredAnswer, String> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    // Tolerate prose wrapping around a single JSON object, nothing more.
    let body = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if end > start => &body[start..=end],
        _ => return Err("output contains no JSON object".into()),
    };

    serde_json::from_str::<StructuredAnswer>(body).map_err(|e| format!("schema violation: {e}"))
}

/// Result of aligning model citations against the current hit set.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub citations: Vec<Citation>,
    pub dropped: usize,
}

/// Keep only citations whose `node_id` belongs to the hit set, enriched with
/// page/article/section provenance from the hit and its node.
pub fn align_citations(
    raw: &[RawCitation],
    hits: &[RetrievalHit],
    nodes: &HashMap<Uuid, Node>,
) -> Alignment {
    let hits_by_node: HashMap<Uuid, &RetrievalHit> =
        hits.iter().map(|h| (h.node_id, h)).collect();

    let mut citations = Vec::new();
    let mut dropped = 0usize;
    for citation in raw {
        let Ok(node_id) = Uuid::parse_str(&citation.node_id) else {
            dropped += 1;
            continue;
        };
        let Some(hit) = hits_by_node.get(&node_id) else {
            dropped += 1;
            continue;
        };
        let node = nodes.get(&node_id);
        citations.push(Citation {
            node_id,
            rank: citation.rank.or(Some(hit.rank)),
            quote: citation
                .quote
                .clone()
                .or_else(|| Some(short_quote(&hit.excerpt))),
            page: Some(hit.page),
            article_id: node.and_then(|n| n.article_id.clone()),
            section_path: node.and_then(|n| n.section_path.clone()),
            locator: Some(format!("p.{}", hit.page)),
        });
    }
    Alignment { citations, dropped }
}

fn short_quote(excerpt: &str) -> String {
    const MAX_CHARS: usize = 160;
    if excerpt.chars().count() <= MAX_CHARS {
        excerpt.to_string()
    } else {
        excerpt.chars().take(MAX_CHARS).collect()
    }
}
