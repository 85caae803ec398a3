//! Retrieval engine for the lexrag pipeline.
//!
//! One query becomes one [`RetrievalRecord`]: keyword recall (BM25 through
//! the document store) and vector recall (the KB's embedding provider plus
//! the vector store) run in parallel, join, fuse into a deduplicated list,
//! optionally rerank, and persist with full per-hit provenance.
//!
//! Policy highlights:
//! - a query with no searchable terms blocks as `weak_query`;
//! - empty recall on both sides yields `no_evidence` (the record is still
//!   written, with an empty hit list);
//! - one recall side failing degrades to the other and marks the gate
//!   `partial`;
//! - cancellation before the recall join persists nothing.
//!
//! [`RetrievalRecord`]: store::RetrievalRecord

mod engine;
mod error;
mod fusion;
mod rerank;
mod types;

pub use engine::{RetrievalEngine, RetrievalOutcome, RetrievalProviders, RetrievalRequest};
pub use error::RetrievalError;
pub use fusion::fuse;
pub use rerank::{rerank_cross, rerank_llm};
pub use types::{
    excerpt_of, Candidate, FusionStrategy, RecallStage, RerankStrategy, RetrievalOptions,
    SourceWeights,
};
