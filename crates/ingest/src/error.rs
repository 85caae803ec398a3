use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the ingest engine.
///
/// Stage failures that leave the file in state `failed` (embedding, vector
/// write, store write) are reported through the outcome's gate report rather
/// than as `Err`; this enum covers input errors and hard stops.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid ingest request: {0}")]
    InvalidRequest(String),
    #[error("knowledge base {0} not found")]
    KbNotFound(Uuid),
    #[error("cannot read source '{uri}': {reason}")]
    Io { uri: String, reason: String },
    #[error("parse failure: {0}")]
    Parse(String),
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
    #[error("ingest cancelled")]
    Cancelled,
}
