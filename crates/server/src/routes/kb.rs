use crate::error::ServerResult;
use crate::state::ServerState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CreateKbRequest {
    pub name: String,
    #[serde(default)]
    pub embed_provider: Option<String>,
}

/// Create a knowledge base bound to an embedding configuration.
pub async fn create_kb(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CreateKbRequest>,
) -> ServerResult<impl IntoResponse> {
    let kb = state
        .app
        .create_kb(&request.name, request.embed_provider.as_deref())?;
    Ok(Json(json!({
        "kb_id": kb.id,
        "name": kb.name,
        "collection": kb.collection,
        "embed_provider": kb.embed_provider,
        "embed_model": kb.embed_model,
        "embed_dim": kb.embed_dim,
    })))
}

/// List all knowledge bases.
pub async fn list_kbs(State(state): State<Arc<ServerState>>) -> ServerResult<impl IntoResponse> {
    let kbs = state
        .app
        .store
        .list_kbs()
        .map_err(lexrag::CoreError::from)?;
    Ok(Json(json!({ "knowledge_bases": kbs })))
}
