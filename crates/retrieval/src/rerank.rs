//! Rerank stage: re-score the fused list with a stronger model.
//!
//! Two backends behind provider contracts: a cross-encoder style scorer and
//! an LLM judge. Both produce `score_details.rerank_score` and the scoring
//! model's identity, and both use a stable sort so equal scores keep their
//! fused order.

use providers::{ChatMessage, ChatOptions, ChatProvider, RerankProvider};
use serde_json::json;

use crate::error::RetrievalError;
use crate::types::{Candidate, RecallStage};

/// Rerank with a relevance-scoring provider (cross-encoder contract).
pub async fn rerank_cross(
    reranker: &dyn RerankProvider,
    query: &str,
    fused: Vec<Candidate>,
    top_k: usize,
) -> Result<Vec<Candidate>, RetrievalError> {
    let mut candidates: Vec<Candidate> = fused.into_iter().take(top_k).collect();
    if candidates.is_empty() {
        return Ok(candidates);
    }
    let passages: Vec<String> = candidates
        .iter()
        .map(|c| c.excerpt.clone().unwrap_or_default())
        .collect();
    let scores = reranker
        .rerank(query, &passages)
        .await
        .map_err(|e| RetrievalError::Rerank(e.to_string()))?;
    if scores.len() != candidates.len() {
        return Err(RetrievalError::Rerank(format!(
            "{} scores for {} candidates",
            scores.len(),
            candidates.len()
        )));
    }

    for (candidate, score) in candidates.iter_mut().zip(&scores) {
        apply_rerank_score(candidate, *score, reranker.name(), reranker.model());
    }
    stable_sort_by_score(&mut candidates);
    Ok(candidates)
}

/// Rerank by asking an LLM to score each passage. The model must answer
/// with a JSON array of `{index, score}`; anything else is a rerank failure
/// the engine degrades from.
pub async fn rerank_llm(
    chat: &dyn ChatProvider,
    query: &str,
    fused: Vec<Candidate>,
    top_k: usize,
) -> Result<Vec<Candidate>, RetrievalError> {
    let mut candidates: Vec<Candidate> = fused.into_iter().take(top_k).collect();
    if candidates.is_empty() {
        return Ok(candidates);
    }

    let mut passage_block = String::new();
    for (idx, candidate) in candidates.iter().enumerate() {
        passage_block.push_str(&format!(
            "[{idx}] {}\n",
            candidate.excerpt.as_deref().unwrap_or_default()
        ));
    }
    let messages = vec![
        ChatMessage::system(
            "You score legal passages for relevance to a question. Respond with only a JSON \
             array of objects {\"index\": <passage index>, \"score\": <0.0-1.0>}, one per passage.",
        ),
        ChatMessage::user(format!("Question: {query}\n\nPassages:\n{passage_block}")),
    ];
    let output = chat
        .chat(&messages, &ChatOptions::default())
        .await
        .map_err(|e| RetrievalError::Rerank(e.to_string()))?;

    let scores = parse_llm_scores(&output.raw_text, candidates.len())
        .ok_or_else(|| RetrievalError::Rerank("LLM rerank output was not a score array".into()))?;

    for (candidate, score) in candidates.iter_mut().zip(&scores) {
        apply_rerank_score(candidate, *score, chat.name(), chat.model());
    }
    stable_sort_by_score(&mut candidates);
    Ok(candidates)
}

fn apply_rerank_score(candidate: &mut Candidate, score: f32, provider: &str, model: &str) {
    let mut details = candidate.score_details.clone();
    details["rerank_score"] = json!(score);
    details["model"] = json!(format!("{provider}/{model}"));
    candidate.stage = RecallStage::Rerank;
    candidate.score = score;
    candidate.score_details = details;
}

/// `Vec::sort_by` is stable, so equal rerank scores keep fused order.
fn stable_sort_by_score(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn parse_llm_scores(raw: &str, expected: usize) -> Option<Vec<f32>> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let items = value.as_array()?;
    let mut scores = vec![0f32; expected];
    for item in items {
        let index = item["index"].as_u64()? as usize;
        let score = item["score"].as_f64()? as f32;
        if index >= expected {
            return None;
        }
        scores[index] = score;
    }
    Some(scores)
}
