//! Core error taxonomy.
//!
//! Every stage error converges here so the HTTP layer and the CLI can map
//! outcomes uniformly: BadRequest and NotFound surface unchanged, external
//! dependency failures are recorded and surfaced without retry, pipeline
//! errors imply a bug and are always logged with full context, and
//! GateBlocked carries the structured reasons a caller must show.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Schema or range violation in a stage input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Referenced entity absent.
    #[error("not found: {0}")]
    NotFound(String),
    /// Invariant violation inside a stage; implies a bug.
    #[error("pipeline error: {0}")]
    Pipeline(String),
    /// DB, vector store, or model provider unavailable or timed out.
    #[error("external dependency error: {0}")]
    ExternalDependency(String),
    /// A gate returned `fail`; downstream stages were skipped.
    #[error("gate blocked at {stage}: {reasons:?}")]
    GateBlocked { stage: String, reasons: Vec<String> },
    /// The request's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,
}

impl CoreError {
    /// Stable status word for CLI stderr reporting.
    pub fn status_word(&self) -> &'static str {
        match self {
            CoreError::BadRequest(_) => "bad_request",
            CoreError::NotFound(_) => "not_found",
            CoreError::Pipeline(_) => "pipeline_error",
            CoreError::ExternalDependency(_) => "external_dependency",
            CoreError::GateBlocked { .. } => "gate_blocked",
            CoreError::Cancelled => "cancelled",
        }
    }
}

impl From<store::StoreError> for CoreError {
    fn from(err: store::StoreError) -> Self {
        match err {
            store::StoreError::NotFound(msg) => CoreError::NotFound(msg),
            store::StoreError::Conflict(msg) => CoreError::BadRequest(msg),
            other => CoreError::ExternalDependency(other.to_string()),
        }
    }
}

impl From<vector::VectorError> for CoreError {
    fn from(err: vector::VectorError) -> Self {
        match err {
            vector::VectorError::DimensionMismatch { .. } | vector::VectorError::EmptyQuery => {
                CoreError::BadRequest(err.to_string())
            }
            other => CoreError::ExternalDependency(other.to_string()),
        }
    }
}

impl From<providers::ProviderError> for CoreError {
    fn from(err: providers::ProviderError) -> Self {
        match err {
            providers::ProviderError::InvalidConfig(msg) => CoreError::BadRequest(msg),
            other => CoreError::ExternalDependency(other.to_string()),
        }
    }
}

impl From<ingest::IngestError> for CoreError {
    fn from(err: ingest::IngestError) -> Self {
        match err {
            ingest::IngestError::InvalidRequest(msg) => CoreError::BadRequest(msg),
            ingest::IngestError::KbNotFound(id) => {
                CoreError::NotFound(format!("knowledge base {id}"))
            }
            ingest::IngestError::Io { .. } | ingest::IngestError::Parse(_) => {
                CoreError::BadRequest(err.to_string())
            }
            ingest::IngestError::Store(inner) => inner.into(),
            ingest::IngestError::Cancelled => CoreError::Cancelled,
        }
    }
}

impl From<retrieval::RetrievalError> for CoreError {
    fn from(err: retrieval::RetrievalError) -> Self {
        match err {
            retrieval::RetrievalError::InvalidOptions(msg) => CoreError::BadRequest(msg),
            retrieval::RetrievalError::Store(inner) => inner.into(),
            retrieval::RetrievalError::Vector(inner) => inner.into(),
            retrieval::RetrievalError::Embed(inner) => inner.into(),
            retrieval::RetrievalError::Rerank(msg) => CoreError::ExternalDependency(msg),
            retrieval::RetrievalError::Cancelled => CoreError::Cancelled,
        }
    }
}

impl From<generation::GenerationError> for CoreError {
    fn from(err: generation::GenerationError) -> Self {
        match err {
            generation::GenerationError::UnknownPrompt(msg) => {
                CoreError::BadRequest(format!("unknown prompt {msg}"))
            }
            generation::GenerationError::Store(inner) => inner.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_words_are_stable() {
        assert_eq!(CoreError::BadRequest("x".into()).status_word(), "bad_request");
        assert_eq!(
            CoreError::GateBlocked {
                stage: "retrieval".into(),
                reasons: vec!["no_evidence".into()],
            }
            .status_word(),
            "gate_blocked"
        );
    }

    #[test]
    fn store_not_found_maps_to_not_found() {
        let err: CoreError = store::StoreError::NotFound("node x".into()).into();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn provider_http_maps_to_external_dependency() {
        let err: CoreError = providers::ProviderError::Http("503".into()).into();
        assert!(matches!(err, CoreError::ExternalDependency(_)));
    }
}
