use crate::error::ServerResult;
use crate::state::ServerState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use lexrag::{GateReport, IngestProfile, IngestRequest, IngestStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct IngestApiRequest {
    pub kb_id: Uuid,
    pub source_uri: String,
    pub file_name: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub ingest_profile: IngestProfile,
}

#[derive(Debug, Serialize)]
pub struct IngestApiResponse {
    pub file_id: Uuid,
    pub ingest_status: IngestStatus,
    pub node_count: u32,
    pub pages: u32,
    pub timing_ms: TimingMs,
    pub gate: GateReport,
    pub short_circuited: bool,
}

#[derive(Debug, Serialize)]
pub struct TimingMs {
    pub parse: u64,
    pub segment: u64,
    pub embed: u64,
    pub vector: u64,
    pub db: u64,
}

/// Ingest one document into a KB.
pub async fn ingest_document(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<IngestApiRequest>,
) -> ServerResult<impl IntoResponse> {
    let outcome = state
        .app
        .ingest(
            IngestRequest {
                kb_id: request.kb_id,
                source_uri: request.source_uri,
                file_name: request.file_name,
                dry_run: request.dry_run,
                force: request.force,
                profile: request.ingest_profile,
            },
            &CancellationToken::new(),
        )
        .await?;

    Ok(Json(IngestApiResponse {
        file_id: outcome.file_id,
        ingest_status: outcome.ingest_status,
        node_count: outcome.node_count,
        pages: outcome.pages,
        timing_ms: TimingMs {
            parse: outcome.timings.parse_ms,
            segment: outcome.timings.segment_ms,
            embed: outcome.timings.embed_ms,
            vector: outcome.timings.vector_ms,
            db: outcome.timings.db_ms,
        },
        gate: outcome.gate,
        short_circuited: outcome.short_circuited,
    }))
}
