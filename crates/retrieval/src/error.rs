use providers::ProviderError;
use thiserror::Error;

/// Errors surfaced by the retrieval engine.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("invalid retrieval options: {0}")]
    InvalidOptions(String),
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
    #[error("vector store error: {0}")]
    Vector(#[from] vector::VectorError),
    #[error("embedding provider error: {0}")]
    Embed(#[from] ProviderError),
    #[error("rerank failure: {0}")]
    Rerank(String),
    #[error("retrieval cancelled")]
    Cancelled,
}
