//! lexrag HTTP server.
//!
//! Thin transport shell over the core: it translates the wire envelope,
//! maps the core error taxonomy onto status codes, and stays out of the
//! trust pipeline's way. All gate and evaluator semantics live in the core;
//! a blocked answer is a normal 200 reply with `status = "blocked"`.
//!
//! # Endpoints
//!
//! - `GET /` — API information
//! - `GET /health` — liveness probe
//! - `POST /api/v1/kb` / `GET /api/v1/kb` — KB administration
//! - `POST /api/v1/ingest` — ingest one document
//! - `POST /api/v1/chat` — one chat turn (flag `debug` for the evidence
//!   chain)
//! - `GET /api/v1/records/retrieval/{id}` — retrieval record with hits
//! - `GET /api/v1/records/generation/{id}` — generation record
//! - `GET /api/v1/records/evaluation/{id}` — evaluation record
//! - `GET /api/v1/records/node/{id}` — evidence node preview
//! - `GET /api/v1/records/page` — evidence page preview

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{build_router, start_server};
pub use state::ServerState;
