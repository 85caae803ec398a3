use thiserror::Error;

/// Errors surfaced by the document store.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        // serde_json does not distinguish direction; callers only encode
        // trusted values, so a failure here is almost always a decode.
        StoreError::Decode(err.to_string())
    }
}
