//! lexrag: trusted RAG core for legal question answering.
//!
//! The `lexrag` crate is the umbrella over the pipeline crates and owns the
//! two pieces that tie them together: the chat orchestrator (retrieval →
//! generation → evaluation under the gate kernel) and the application
//! assembly (stores, provider registry, configuration).
//!
//! The pipeline's promise: for every query the core produces an answer with
//! a verifiable, replayable evidence chain — `(RetrievalRecord, hits,
//! GenerationRecord, EvaluationRecord)` — or it refuses explicitly. Every
//! intermediate artifact is persisted and addressable by id; every stage is
//! guarded by a gate whose failure blocks downstream work and shows up in
//! the message status.
//!
//! ## Quick start
//!
//! ```no_run
//! use lexrag::{App, AppConfig, ChatRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), lexrag::CoreError> {
//! let app = App::open(AppConfig::default())?;
//! let kb = app.create_kb("default", None)?;
//! let reply = app
//!     .chat(
//!         ChatRequest {
//!             query: "What are the rental rules?".into(),
//!             kb_id: kb.id,
//!             conversation_id: None,
//!             debug: false,
//!             context: Default::default(),
//!         },
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! println!("{:?} {:?}", reply.status, reply.answer);
//! # Ok(())
//! # }
//! ```

mod app;
pub mod chat;
pub mod config;
mod error;

pub use app::App;
pub use chat::{
    ChatContext, ChatDebug, ChatEngine, ChatReply, ChatRequest, EvaluatorSummary, RecordIds,
};
pub use config::{
    AppConfig, ChatProviderConfig, EmbedProviderConfig, ProviderKind, ProviderRegistry,
    ProvidersConfig, RerankProviderConfig,
};
pub use error::CoreError;

// Re-export the stage crates' surface so applications can drive the whole
// pipeline through a single dependency.
pub use evaluator::{EvaluatorConfig, RULE_VERSION};
pub use gate::{CheckStatus, GateCheck, GateReport, GateStatus, Stage};
pub use ingest::{IngestOutcome, IngestProfile, IngestRequest, ParserKind};
pub use retrieval::{FusionStrategy, RerankStrategy, RetrievalOptions};
pub use store::{
    Citation, Conversation, Document, EvaluationRecord, GenerationRecord, GenerationStatus,
    HitSource, IngestStatus, KnowledgeBase, KnowledgeFile, Message, MessageStatus, Node, PageText,
    RetrievalHit, RetrievalRecord,
};
