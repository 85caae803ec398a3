//! Evidence-chain replay endpoints: every persisted record is addressable.

use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use lexrag::CoreError;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

pub async fn retrieval_record(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> ServerResult<impl IntoResponse> {
    let (record, hits) = state
        .app
        .store
        .get_retrieval_record(id)
        .map_err(CoreError::from)?
        .ok_or(ServerError::NotFound)?;
    Ok(Json(json!({ "record": record, "hits": hits })))
}

pub async fn generation_record(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> ServerResult<impl IntoResponse> {
    let record = state
        .app
        .store
        .get_generation_record(id)
        .map_err(CoreError::from)?
        .ok_or(ServerError::NotFound)?;
    Ok(Json(json!({ "record": record })))
}

pub async fn evaluation_record(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> ServerResult<impl IntoResponse> {
    let record = state
        .app
        .store
        .get_evaluation_record(id)
        .map_err(CoreError::from)?
        .ok_or(ServerError::NotFound)?;
    Ok(Json(json!({ "record": record })))
}

/// Evidence preview: one node by id.
pub async fn node(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> ServerResult<impl IntoResponse> {
    let node = state
        .app
        .store
        .get_node(id)
        .map_err(CoreError::from)?
        .ok_or(ServerError::NotFound)?;
    Ok(Json(json!({ "node": node })))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub document_id: Uuid,
    pub page: u32,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

fn default_max_chars() -> usize {
    4000
}

/// Evidence preview: one page of a document, concatenated in reading order.
pub async fn page(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<PageQuery>,
) -> ServerResult<impl IntoResponse> {
    let page = state
        .app
        .store
        .get_page(query.document_id, query.page, query.max_chars)
        .map_err(CoreError::from)?
        .ok_or(ServerError::NotFound)?;
    Ok(Json(json!({ "page": page })))
}
