use thiserror::Error;

/// Errors surfaced by the generation engine.
///
/// Model-call failures are not errors here: the record is written with
/// `status = failed` and the outcome carries a failed gate. `Err` covers
/// input problems and persistence failures only.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("unknown prompt: {0}")]
    UnknownPrompt(String),
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
}
