//! Candidate model and retrieval options.
//!
//! [`Candidate`] is the single intermediate flowing through recall, fusion,
//! and rerank: a stage-tagged record, reversibly mappable to a [`Node`] (for
//! prompt context) and to a [`RetrievalHit`] (for persistence).

use serde::{Deserialize, Serialize};
use store::{HitSource, Node, RetrievalHit};
use uuid::Uuid;

/// Which retrieval sub-stage produced a candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecallStage {
    Keyword,
    Vector,
    Fusion,
    Rerank,
}

impl RecallStage {
    pub fn hit_source(&self) -> HitSource {
        match self {
            RecallStage::Keyword => HitSource::Keyword,
            RecallStage::Vector => HitSource::Vector,
            RecallStage::Fusion => HitSource::Fused,
            RecallStage::Rerank => HitSource::Reranked,
        }
    }
}

/// Stage-tagged intermediate hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub node_id: Uuid,
    pub stage: RecallStage,
    pub score: f32,
    pub score_details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<u32>,
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl Candidate {
    /// Build a keyword/vector candidate from the node it refers to.
    pub fn from_node(node: &Node, stage: RecallStage, score: f32, score_details: serde_json::Value) -> Self {
        Self {
            node_id: node.id,
            stage,
            score,
            score_details,
            excerpt: Some(excerpt_of(&node.text)),
            page: Some(node.page),
            start_offset: node.start_offset,
            end_offset: node.end_offset,
            meta: serde_json::json!({
                "article_id": node.article_id,
                "section_path": node.section_path,
            }),
        }
    }

    /// Project into a persistable hit; `node_id`, page, and offsets survive
    /// the round trip unchanged.
    pub fn to_hit(&self, retrieval_record_id: Uuid, rank: u32) -> RetrievalHit {
        RetrievalHit {
            retrieval_record_id,
            node_id: self.node_id,
            source: self.stage.hit_source(),
            rank,
            score: self.score,
            score_details: self.score_details.clone(),
            excerpt: self.excerpt.clone().unwrap_or_default(),
            page: self.page.unwrap_or(0),
            start_offset: self.start_offset,
            end_offset: self.end_offset,
        }
    }
}

/// Trim node text down to a hit excerpt.
pub fn excerpt_of(text: &str) -> String {
    const MAX_CHARS: usize = 280;
    if text.chars().count() <= MAX_CHARS {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(MAX_CHARS).collect();
        out.push('…');
        out
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FusionStrategy {
    Union,
    #[default]
    Rrf,
    Weighted,
}

impl FusionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionStrategy::Union => "union",
            FusionStrategy::Rrf => "rrf",
            FusionStrategy::Weighted => "weighted",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RerankStrategy {
    #[default]
    None,
    CrossEncoder,
    Llm,
}

impl RerankStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RerankStrategy::None => "none",
            RerankStrategy::CrossEncoder => "cross_encoder",
            RerankStrategy::Llm => "llm",
        }
    }
}

/// Per-source weights for the `weighted` fusion strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SourceWeights {
    pub keyword: f32,
    pub vector: f32,
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            keyword: 0.5,
            vector: 0.5,
        }
    }
}

/// Stage caps and strategy selection for one retrieval run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalOptions {
    #[serde(default = "default_keyword_top_k")]
    pub keyword_top_k: usize,
    /// Zero disables vector recall entirely.
    #[serde(default = "default_vector_top_k")]
    pub vector_top_k: usize,
    #[serde(default = "default_fusion_top_k")]
    pub fusion_top_k: usize,
    #[serde(default = "default_rerank_top_k")]
    pub rerank_top_k: usize,
    #[serde(default)]
    pub fusion_strategy: FusionStrategy,
    #[serde(default)]
    pub rerank_strategy: RerankStrategy,
    /// RRF constant *k*.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,
    #[serde(default)]
    pub weights: SourceWeights,
    /// Also persist keyword/vector-stage hits alongside the final list.
    #[serde(default)]
    pub persist_intermediate: bool,
}

fn default_keyword_top_k() -> usize {
    10
}

fn default_vector_top_k() -> usize {
    10
}

fn default_fusion_top_k() -> usize {
    8
}

fn default_rerank_top_k() -> usize {
    5
}

fn default_rrf_k() -> f32 {
    60.0
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            keyword_top_k: default_keyword_top_k(),
            vector_top_k: default_vector_top_k(),
            fusion_top_k: default_fusion_top_k(),
            rerank_top_k: default_rerank_top_k(),
            fusion_strategy: FusionStrategy::default(),
            rerank_strategy: RerankStrategy::default(),
            rrf_k: default_rrf_k(),
            weights: SourceWeights::default(),
            persist_intermediate: false,
        }
    }
}

impl RetrievalOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.keyword_top_k == 0 && self.vector_top_k == 0 {
            return Err("keyword_top_k and vector_top_k cannot both be zero".into());
        }
        if self.fusion_top_k == 0 {
            return Err("fusion_top_k must be greater than zero".into());
        }
        if self.rerank_strategy != RerankStrategy::None && self.rerank_top_k == 0 {
            return Err("rerank_top_k must be greater than zero when reranking".into());
        }
        if self.rrf_k <= 0.0 {
            return Err("rrf_k must be positive".into());
        }
        if self.weights.keyword + self.weights.vector <= 0.0 {
            return Err("fusion weights must sum to a positive value".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RetrievalOptions::default().validate().is_ok());
    }

    #[test]
    fn both_recalls_disabled_rejected() {
        let opts = RetrievalOptions {
            keyword_top_k: 0,
            vector_top_k: 0,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn strategy_serde_matches_contract() {
        assert_eq!(serde_json::to_string(&FusionStrategy::Rrf).unwrap(), "\"rrf\"");
        assert_eq!(
            serde_json::to_string(&RerankStrategy::CrossEncoder).unwrap(),
            "\"cross_encoder\""
        );
        let strategy: RerankStrategy = serde_json::from_str("\"llm\"").unwrap();
        assert_eq!(strategy, RerankStrategy::Llm);
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        let long = "§".repeat(400);
        let short = excerpt_of(&long);
        assert_eq!(short.chars().count(), 281);
        assert!(short.ends_with('…'));
    }
}
