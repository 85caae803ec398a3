//! Fusion stage: merge keyword and vector candidates into one ranked list.
//!
//! Deduplication key is `node_id`. When a node arrives from both sources its
//! `score_details` keeps both component scores next to the fused score, so a
//! persisted hit can always explain itself.

use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

use crate::types::{Candidate, FusionStrategy, RecallStage, RetrievalOptions};

struct Merged {
    template: Candidate,
    keyword_rank: Option<usize>,
    keyword_score: Option<f32>,
    vector_rank: Option<usize>,
    vector_score: Option<f32>,
    /// Component provenance carried forward from either source.
    normalizer: Option<serde_json::Value>,
    metric_type: Option<serde_json::Value>,
}

/// Fuse two recall lists according to the configured strategy. Result is
/// unique by node, sorted by fused score (ties: keyword rank, then vector
/// rank, then node id), truncated to `fusion_top_k`.
pub fn fuse(keyword: &[Candidate], vector: &[Candidate], opts: &RetrievalOptions) -> Vec<Candidate> {
    let mut merged: HashMap<Uuid, Merged> = HashMap::new();
    let keyword_norm = minmax(&scores_of(keyword));
    let vector_norm = minmax(&scores_of(vector));

    for (idx, candidate) in keyword.iter().enumerate() {
        let entry = merged.entry(candidate.node_id).or_insert_with(|| Merged {
            template: candidate.clone(),
            keyword_rank: None,
            keyword_score: None,
            vector_rank: None,
            vector_score: None,
            normalizer: None,
            metric_type: None,
        });
        entry.keyword_rank = Some(idx + 1);
        entry.keyword_score = Some(keyword_norm[idx]);
        entry.normalizer = candidate.score_details.get("normalizer").cloned();
    }
    for (idx, candidate) in vector.iter().enumerate() {
        let entry = merged.entry(candidate.node_id).or_insert_with(|| Merged {
            template: candidate.clone(),
            keyword_rank: None,
            keyword_score: None,
            vector_rank: None,
            vector_score: None,
            normalizer: None,
            metric_type: None,
        });
        entry.vector_rank = Some(idx + 1);
        entry.vector_score = Some(vector_norm[idx]);
        entry.metric_type = candidate.score_details.get("metric_type").cloned();
    }

    let mut fused: Vec<Candidate> = merged
        .into_values()
        .map(|entry| {
            let score = match opts.fusion_strategy {
                FusionStrategy::Union => entry
                    .keyword_score
                    .unwrap_or(0.0)
                    .max(entry.vector_score.unwrap_or(0.0)),
                FusionStrategy::Rrf => {
                    rrf_term(opts.rrf_k, entry.keyword_rank) + rrf_term(opts.rrf_k, entry.vector_rank)
                }
                FusionStrategy::Weighted => {
                    let total = opts.weights.keyword + opts.weights.vector;
                    (opts.weights.keyword * entry.keyword_score.unwrap_or(0.0)
                        + opts.weights.vector * entry.vector_score.unwrap_or(0.0))
                        / total
                }
            };

            let mut details = json!({
                "fusion_strategy": opts.fusion_strategy.as_str(),
                "fused_score": score,
            });
            if let Some(ks) = entry.keyword_score {
                details["keyword_score"] = json!(ks);
                details["keyword_rank"] = json!(entry.keyword_rank);
            }
            if let Some(vs) = entry.vector_score {
                details["vector_score"] = json!(vs);
                details["vector_rank"] = json!(entry.vector_rank);
            }
            if opts.fusion_strategy == FusionStrategy::Rrf {
                details["rrf_k"] = json!(opts.rrf_k);
            }
            if opts.fusion_strategy == FusionStrategy::Weighted {
                details["weights"] =
                    json!({ "keyword": opts.weights.keyword, "vector": opts.weights.vector });
            }
            // Carry the component provenance forward.
            if let Some(normalizer) = &entry.normalizer {
                details["normalizer"] = normalizer.clone();
            }
            if let Some(metric) = &entry.metric_type {
                details["metric_type"] = metric.clone();
            }

            let mut candidate = entry.template;
            candidate.stage = RecallStage::Fusion;
            candidate.score = score;
            candidate.score_details = details;
            candidate.meta["keyword_rank"] = json!(entry.keyword_rank);
            candidate.meta["vector_rank"] = json!(entry.vector_rank);
            candidate
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| rank_of(a, "keyword_rank").cmp(&rank_of(b, "keyword_rank")))
            .then_with(|| rank_of(a, "vector_rank").cmp(&rank_of(b, "vector_rank")))
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    fused.truncate(opts.fusion_top_k);
    fused
}

fn rrf_term(k: f32, rank: Option<usize>) -> f32 {
    match rank {
        Some(rank) => 1.0 / (k + rank as f32),
        None => 0.0,
    }
}

fn rank_of(candidate: &Candidate, key: &str) -> usize {
    candidate.meta[key].as_u64().map(|r| r as usize).unwrap_or(usize::MAX)
}

fn scores_of(candidates: &[Candidate]) -> Vec<f32> {
    candidates.iter().map(|c| c.score).collect()
}

/// Min-max normalize over the current result set; a degenerate set (all
/// equal) maps to 1.0.
fn minmax(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let max = scores.iter().copied().fold(f32::MIN, f32::max);
    let min = scores.iter().copied().fold(f32::MAX, f32::min);
    let span = max - min;
    scores
        .iter()
        .map(|s| if span > f32::EPSILON { (s - min) / span } else { 1.0 })
        .collect()
}
