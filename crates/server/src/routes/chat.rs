use crate::error::ServerResult;
use crate::middleware::RequestId;
use crate::state::ServerState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use lexrag::ChatRequest;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One chat turn. The reply envelope carries the answer (or refusal), the
/// evaluator summary, citations, and the evidence-chain record ids.
pub async fn chat(
    State(state): State<Arc<ServerState>>,
    request_id: Option<Extension<RequestId>>,
    Json(mut request): Json<ChatRequest>,
) -> ServerResult<impl IntoResponse> {
    // The correlation id rides the context's extra map; the orchestrator
    // persists extras into the evaluation record's metadata, so the
    // evidence chain stays traceable to the request that produced it.
    if let Some(Extension(RequestId(id))) = request_id {
        request
            .context
            .extra
            .insert("request_id".into(), serde_json::Value::String(id));
    }
    let reply = state.app.chat(request, &CancellationToken::new()).await?;
    Ok(Json(reply))
}
