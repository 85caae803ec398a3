//! Generation engine for the lexrag pipeline.
//!
//! Three pure sub-layers behind one entry point:
//! - the prompt builder turns `(query, hits, prompt_name, prompt_version)`
//!   into a three-section message snapshot;
//! - the model caller goes through the [`ChatProvider`] contract and returns
//!   raw text only;
//! - the post-processor strictly parses the JSON output schema and aligns
//!   every citation against the current hit set.
//!
//! A [`GenerationRecord`] is written for every run, whatever happens:
//! dropped citations degrade the status to `partial`, an answer with no
//! surviving citation or no evidence fails, cancellation fails with reason
//! `cancelled`.
//!
//! [`ChatProvider`]: providers::ChatProvider
//! [`GenerationRecord`]: store::GenerationRecord

mod engine;
mod error;
mod postprocess;
mod prompt;

pub use engine::{GenerationEngine, GenerationOutcome, GenerationRequest};
pub use error::GenerationError;
pub use postprocess::{align_citations, parse_structured, Alignment, RawCitation, StructuredAnswer};
pub use prompt::{
    build_messages, resolve, EvidenceEntry, PromptTemplate, DEFAULT_PROMPT_NAME,
    DEFAULT_PROMPT_VERSION,
};
