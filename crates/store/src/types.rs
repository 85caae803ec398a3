//! Relational entities owned by the document store.
//!
//! These are plain serde values; cross-store references (vector ids) are
//! opaque UUIDs with no back-pointers. Everything here is persisted as a
//! record and is the single source of truth for replay.

use chrono::{DateTime, Utc};
use gate::{GateCheck, GateStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named corpus with its own embedding configuration and vector collection.
/// Immutable once a file references it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeBase {
    pub id: Uuid,
    pub name: String,
    /// Vector-store collection this KB writes into.
    pub collection: String,
    pub embed_provider: String,
    pub embed_model: String,
    pub embed_dim: usize,
    pub chunking: ChunkingConfig,
    pub created_at: DateTime<Utc>,
}

/// Segmentation defaults applied to files ingested into a KB.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingConfig {
    /// Sentence-window size for the second segmentation pass.
    #[serde(default = "default_sentence_window")]
    pub sentence_window: usize,
    /// Minimum node text length in chars; shorter fragments are merged.
    #[serde(default = "default_min_node_chars")]
    pub min_node_chars: usize,
}

fn default_sentence_window() -> usize {
    2
}

fn default_min_node_chars() -> usize {
    24
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            sentence_window: default_sentence_window(),
            min_node_chars: default_min_node_chars(),
        }
    }
}

/// Lifecycle state of an ingested file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Pending,
    Success,
    Failed,
}

/// Per-stage ingest timings in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageTimings {
    #[serde(default)]
    pub parse_ms: u64,
    #[serde(default)]
    pub segment_ms: u64,
    #[serde(default)]
    pub embed_ms: u64,
    #[serde(default)]
    pub vector_ms: u64,
    #[serde(default)]
    pub db_ms: u64,
}

/// A file ingested into a KB. `sha256` is the idempotency key within the KB.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeFile {
    pub id: Uuid,
    pub kb_id: Uuid,
    pub file_name: String,
    pub sha256: String,
    pub ingest_status: IngestStatus,
    pub pages: u32,
    pub node_count: u32,
    pub timings: StageTimings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Logical document derived from a file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub kb_id: Uuid,
    pub file_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub pages: u32,
    pub parser: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser_version: Option<String>,
}

/// Smallest addressable evidence unit: an ordered chunk of a parsed document.
///
/// Nodes of one file form a contiguous `node_index` sequence `0..N-1`
/// reflecting reading order; that order is a hard invariant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: Uuid,
    pub kb_id: Uuid,
    pub file_id: Uuid,
    pub document_id: Uuid,
    pub node_index: u32,
    pub text: String,
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<u32>,
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// Exactly one live vector per node per embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeVectorMap {
    pub node_id: Uuid,
    pub vector_id: Uuid,
    pub kb_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    pub kb_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Single observable truth of a query outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Success,
    Failed,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub kb_id: Uuid,
    pub query_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which retrieval stage produced a persisted hit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HitSource {
    Keyword,
    Vector,
    Fused,
    Reranked,
}

/// Immutable snapshot of one retrieval run; 1:1 with its message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalRecord {
    pub id: Uuid,
    pub message_id: Uuid,
    pub kb_id: Uuid,
    pub query_text: String,
    pub keyword_top_k: usize,
    pub vector_top_k: usize,
    pub fusion_top_k: usize,
    pub rerank_top_k: usize,
    pub fusion_strategy: String,
    pub rerank_strategy: String,
    /// Embedding/rerank provider configuration at query time, kept for replay.
    pub provider_snapshot: serde_json::Value,
    pub timing_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// One evidence hit with provenance and scores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalHit {
    pub retrieval_record_id: Uuid,
    pub node_id: Uuid,
    pub source: HitSource,
    /// 1-based rank within its source.
    pub rank: u32,
    pub score: f32,
    pub score_details: serde_json::Value,
    pub excerpt: String,
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Success,
    Partial,
    Failed,
}

/// Snapshot of one generation run: prompt, raw output, parsed output,
/// aligned citations. Always written, even on failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRecord {
    pub id: Uuid,
    pub message_id: Uuid,
    pub retrieval_record_id: Uuid,
    pub prompt_name: String,
    pub prompt_version: String,
    pub model_provider: String,
    pub model_name: String,
    pub messages_snapshot: serde_json::Value,
    pub output_raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_structured: Option<serde_json::Value>,
    pub citations: serde_json::Value,
    pub status: GenerationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A grounded reference from an answer sentence to a retrieval hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub node_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
}

/// Deterministic evaluator verdict over one message's evidence chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationRecord {
    pub id: Uuid,
    pub message_id: Uuid,
    pub retrieval_record_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_record_id: Option<Uuid>,
    pub status: GateStatus,
    pub rule_version: String,
    /// Full evaluator config snapshot; makes verdicts replayable.
    pub config: serde_json::Value,
    pub checks: Vec<GateCheck>,
    pub scores: serde_json::Value,
    #[serde(default)]
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Evidence-preview payload for the page lookup endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageText {
    pub document_id: Uuid,
    pub page: u32,
    pub text: String,
    pub node_ids: Vec<Uuid>,
    pub truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_status_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&IngestStatus::Success).unwrap(), "\"success\"");
        assert_eq!(serde_json::to_string(&MessageStatus::Blocked).unwrap(), "\"blocked\"");
        assert_eq!(serde_json::to_string(&HitSource::Reranked).unwrap(), "\"reranked\"");
    }

    #[test]
    fn chunking_defaults() {
        let cfg: ChunkingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.sentence_window, 2);
        assert_eq!(cfg.min_node_chars, 24);
    }

    #[test]
    fn citation_optional_fields_omitted() {
        let citation = Citation {
            node_id: Uuid::nil(),
            rank: Some(1),
            quote: None,
            page: None,
            article_id: None,
            section_path: None,
            locator: None,
        };
        let json = serde_json::to_string(&citation).unwrap();
        assert!(!json.contains("quote"));
        assert!(json.contains("\"rank\":1"));
    }
}
