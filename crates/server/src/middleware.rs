//! Request correlation.
//!
//! Every HTTP request gets a correlation id that is echoed on the response
//! and handed to the handlers as an extension. The chat route folds it into
//! the request context, and the orchestrator persists context extras into
//! the evaluation record's metadata — so a persisted evidence chain can be
//! tied back to the originating request, not just addressed by record UUID.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id of one HTTP request.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Run the whole request inside a tracing span keyed by the correlation id,
/// emit one structured completion line, and echo the id back to the caller.
pub async fn trace_request(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    request.extensions_mut().insert(RequestId(id.clone()));

    let span = tracing::info_span!(
        "http.request",
        request_id = %id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let started = std::time::Instant::now();
    let mut response = next.run(request).instrument(span).await;

    tracing::info!(
        request_id = %id,
        status = %response.status(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "http_request_complete"
    );
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
