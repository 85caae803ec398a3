//! Server initialization and routing.

use crate::config::ServerConfig;
use crate::middleware::trace_request;
use crate::routes::{self, chat, health, ingest, kb, records};
use crate::state::ServerState;
use axum::middleware::from_fn;
use axum::routing::{get, post};
use axum::Router;
use lexrag::AppConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the router with all routes and middleware.
pub fn build_router(state: Arc<ServerState>) -> Router {
    let cors = if state.config.enable_cors {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };
    let timeout = TimeoutLayer::new(state.config.timeout());

    Router::new()
        .route("/", get(routes::api_info))
        .route("/health", get(health::health_check))
        .route("/api/v1/kb", post(kb::create_kb).get(kb::list_kbs))
        .route("/api/v1/ingest", post(ingest::ingest_document))
        .route("/api/v1/chat", post(chat::chat))
        .route("/api/v1/records/retrieval/{id}", get(records::retrieval_record))
        .route("/api/v1/records/generation/{id}", get(records::generation_record))
        .route("/api/v1/records/evaluation/{id}", get(records::evaluation_record))
        .route("/api/v1/records/node/{id}", get(records::node))
        .route("/api/v1/records/page", get(records::page))
        .fallback(routes::not_found)
        .layer(timeout)
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(from_fn(trace_request))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server; blocks until SIGTERM or Ctrl+C.
pub async fn start_server(config: ServerConfig, app_config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_target(false)
        .json()
        .init();

    let addr: SocketAddr = config.socket_addr()?;
    let state = Arc::new(ServerState::new(config, app_config)?);
    let app = build_router(state);

    tracing::info!("lexrag server listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
