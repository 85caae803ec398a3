//! Model provider contracts for the lexrag pipeline.
//!
//! Three capabilities, each a small object-safe trait:
//!
//! - [`EmbedProvider`]: `embed(texts) -> vectors`
//! - [`ChatProvider`]: `chat(messages, options) -> raw text + usage`
//! - [`RerankProvider`]: `rerank(query, passages) -> relevance scores`
//!
//! Concrete providers come in two flavors behind each contract: a local
//! deterministic stub (offline, reproducible, used by tests and as a safe
//! default) and an OpenAI-compatible HTTP client. Transport does not retry;
//! a failed call surfaces as [`ProviderError::Http`] and the caller records
//! the failure.

mod api;
mod error;
mod normalize;
mod stub;
mod types;

pub use api::{ApiChat, ApiEmbedder, ApiReranker};
pub use error::ProviderError;
pub use normalize::l2_normalize_in_place;
pub use stub::{StubChat, StubEmbedder, StubReranker};
pub use types::{ChatMessage, ChatOptions, ChatOutput, ChatRole, TokenUsage};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Embedding capability. One vector per input text, all of [`Self::dim`].
#[async_trait]
pub trait EmbedProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn dim(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Replayable identity of this provider configuration.
    fn snapshot(&self) -> ProviderSnapshot {
        ProviderSnapshot {
            provider: self.name().to_string(),
            model: self.model().to_string(),
            dim: Some(self.dim()),
        }
    }
}

/// Chat-completion capability. Returns the raw model text; parsing is the
/// caller's job.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatOutput, ProviderError>;
}

/// Relevance-scoring capability for rerank stages. Scores are returned in
/// input order, higher is better.
#[async_trait]
pub trait RerankProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn rerank(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, ProviderError>;
}

/// Structured provider identity persisted into records for exact replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderSnapshot {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim: Option<usize>,
}
