//! In-process API tests: the full router over a temp-dir core with the
//! deterministic stub providers.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use lexrag::AppConfig;
use serde_json::{json, Value};
use server::{build_router, ServerConfig, ServerState};
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const SAMPLE: &str = "# Tenancy Act\n\n## Article 3\n\nThe security deposit may not exceed three months of rent. \
The landlord must return the security deposit within one month of termination.\n\n## Article 4\n\nNotice of \
termination must be given in writing at least three months before the end of the rental period.";

struct TestServer {
    router: Router,
    dir: TempDir,
}

fn test_server() -> TestServer {
    let dir = TempDir::new().unwrap();
    let app_config = AppConfig {
        data_dir: dir.path().join("data").to_string_lossy().into_owned(),
        ..AppConfig::default()
    };
    let state = Arc::new(ServerState::new(ServerConfig::default(), app_config).unwrap());
    TestServer {
        router: build_router(state),
        dir,
    }
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn seeded_kb(server: &TestServer) -> (String, Value) {
    let (status, kb) = call(
        &server.router,
        "POST",
        "/api/v1/kb",
        Some(json!({ "name": "default" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let kb_id = kb["kb_id"].as_str().unwrap().to_string();

    let source = server.dir.path().join("act.md");
    let mut file = std::fs::File::create(&source).unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();

    let (status, outcome) = call(
        &server.router,
        "POST",
        "/api/v1/ingest",
        Some(json!({
            "kb_id": kb_id,
            "source_uri": source.to_string_lossy(),
            "file_name": "act.md",
            "dry_run": false,
            "ingest_profile": { "parser": "markdown" },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    (kb_id, outcome)
}

#[tokio::test]
async fn health_endpoint_is_public() {
    let server = test_server();
    let (status, body) = call(&server.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn ingest_reports_counts_and_timings() {
    let server = test_server();
    let (_, outcome) = seeded_kb(&server).await;

    assert_eq!(outcome["ingest_status"], "success");
    assert!(outcome["node_count"].as_u64().unwrap() > 0);
    assert!(outcome["timing_ms"]["parse"].is_number());
    assert!(outcome["timing_ms"]["db"].is_number());
    assert_eq!(outcome["gate"]["status"], "pass");
}

#[tokio::test]
async fn chat_happy_path_returns_grounded_answer() {
    let server = test_server();
    let (kb_id, _) = seeded_kb(&server).await;

    let (status, reply) = call(
        &server.router,
        "POST",
        "/api/v1/chat",
        Some(json!({
            "query": "What is the security deposit cap?",
            "kb_id": kb_id,
            "debug": true,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["status"], "success");
    assert_eq!(reply["evaluator"]["status"], "pass");
    assert!(reply["answer"].as_str().unwrap().len() > 10);

    // Every citation points into the debug hit set.
    let hit_ids: Vec<&str> = reply["debug"]["hits"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["node_id"].as_str().unwrap())
        .collect();
    let citations = reply["citations"].as_array().unwrap();
    assert!(!citations.is_empty());
    for citation in citations {
        assert!(hit_ids.contains(&citation["node_id"].as_str().unwrap()));
    }
}

#[tokio::test]
async fn chat_on_empty_kb_blocks_without_answer() {
    let server = test_server();
    let (status, kb) = call(
        &server.router,
        "POST",
        "/api/v1/kb",
        Some(json!({ "name": "empty" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, reply) = call(
        &server.router,
        "POST",
        "/api/v1/chat",
        Some(json!({
            "query": "What are the rental rules?",
            "kb_id": kb["kb_id"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["status"], "blocked");
    assert!(reply.get("answer").is_none() || reply["answer"].is_null());
    assert_eq!(reply["evaluator"]["status"], "fail");
    assert!(reply["reasons"]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r.as_str().unwrap().contains("no_evidence")));
    assert!(reply["records"]["retrieval_record_id"].is_string());
}

#[tokio::test]
async fn evidence_chain_records_are_addressable() {
    let server = test_server();
    let (kb_id, _) = seeded_kb(&server).await;

    let (_, reply) = call(
        &server.router,
        "POST",
        "/api/v1/chat",
        Some(json!({
            "query": "How much notice is required for termination?",
            "kb_id": kb_id,
            "debug": true,
        })),
    )
    .await;

    let retrieval_id = reply["records"]["retrieval_record_id"].as_str().unwrap();
    let (status, body) = call(
        &server.router,
        "GET",
        &format!("/api/v1/records/retrieval/{retrieval_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["hits"].as_array().unwrap().is_empty());

    let generation_id = reply["records"]["generation_record_id"].as_str().unwrap();
    let (status, body) = call(
        &server.router,
        "GET",
        &format!("/api/v1/records/generation/{generation_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["record"]["messages_snapshot"].is_array());

    let evaluation_id = reply["records"]["evaluation_record_id"].as_str().unwrap();
    let (status, body) = call(
        &server.router,
        "GET",
        &format!("/api/v1/records/evaluation/{evaluation_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["record"]["rule_version"], "legal-qa-rules/v1");

    // Node preview via the first hit.
    let node_id = reply["debug"]["hits"][0]["node_id"].as_str().unwrap();
    let (status, body) = call(
        &server.router,
        "GET",
        &format!("/api/v1/records/node/{node_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let document_id = body["node"]["document_id"].as_str().unwrap().to_string();
    let page = body["node"]["page"].as_u64().unwrap();

    let (status, body) = call(
        &server.router,
        "GET",
        &format!("/api/v1/records/page?document_id={document_id}&page={page}&max_chars=500"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["page"]["text"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn request_id_round_trips_into_the_evaluation_record() {
    let server = test_server();
    let (kb_id, _) = seeded_kb(&server).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/chat")
        .header("content-type", "application/json")
        .header("x-request-id", "req-legal-7")
        .body(Body::from(
            json!({ "query": "What is the security deposit cap?", "kb_id": kb_id }).to_string(),
        ))
        .unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-legal-7");

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let reply: Value = serde_json::from_slice(&bytes).unwrap();
    let evaluation_id = reply["records"]["evaluation_record_id"].as_str().unwrap();

    // The correlation id is persisted with the evidence chain, so the
    // record can be traced back to the request that produced it.
    let (status, body) = call(
        &server.router,
        "GET",
        &format!("/api/v1/records/evaluation/{evaluation_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["record"]["meta"]["context_extra"]["request_id"],
        "req-legal-7"
    );
}

#[tokio::test]
async fn unknown_record_is_404() {
    let server = test_server();
    let (status, body) = call(
        &server.router,
        "GET",
        "/api/v1/records/node/00000000-0000-0000-0000-000000000001",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn unknown_kb_in_chat_is_404() {
    let server = test_server();
    let (status, body) = call(
        &server.router,
        "POST",
        "/api/v1/chat",
        Some(json!({
            "query": "anything",
            "kb_id": "00000000-0000-0000-0000-000000000042",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn invalid_fusion_strategy_is_400() {
    let server = test_server();
    let (kb_id, _) = seeded_kb(&server).await;
    let (status, body) = call(
        &server.router,
        "POST",
        "/api/v1/chat",
        Some(json!({
            "query": "rental rules",
            "kb_id": kb_id,
            "context": { "fusion_strategy": "borda" },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}
