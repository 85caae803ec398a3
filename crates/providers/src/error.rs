use thiserror::Error;

/// Errors surfaced by any provider call.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    /// Provider configuration is inconsistent (missing URL, bad dimension).
    #[error("invalid provider config: {0}")]
    InvalidConfig(String),
    /// Transport failed or the upstream returned a non-success status.
    /// Never retried here; the caller records the failure.
    #[error("provider http error: {0}")]
    Http(String),
    /// The upstream answered but the body did not match the expected shape.
    #[error("unexpected provider response: {0}")]
    UnexpectedResponse(String),
}
