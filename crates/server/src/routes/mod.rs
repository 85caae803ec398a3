pub mod chat;
pub mod health;
pub mod ingest;
pub mod kb;
pub mod records;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// API information at the root path.
pub async fn api_info() -> impl IntoResponse {
    Json(json!({
        "name": "lexrag",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Trusted RAG core for legal question answering",
        "endpoints": {
            "ingest": "POST /api/v1/ingest",
            "chat": "POST /api/v1/chat",
            "kb": "POST /api/v1/kb, GET /api/v1/kb",
            "records": "GET /api/v1/records/{retrieval|generation|evaluation}/{id}",
            "evidence": "GET /api/v1/records/node/{id}, GET /api/v1/records/page",
        }
    }))
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": { "code": "NOT_FOUND", "message": "Unknown route" }
        })),
    )
}
