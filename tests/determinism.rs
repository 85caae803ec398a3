//! Determinism guarantees: identical inputs replay to identical artifacts.

use lexrag::{App, AppConfig, ChatContext, ChatRequest, IngestProfile, IngestRequest};
use providers::{EmbedProvider, StubEmbedder};
use std::io::Write;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const TENANCY_ACT: &str = "# Tenancy Act\n\n## Article 3\n\nThe security deposit may not exceed three months of rent. \
The landlord must return the security deposit within one month of termination.";

#[tokio::test]
async fn stub_embedder_is_reproducible_across_instances() {
    let a = StubEmbedder::new(128);
    let b = StubEmbedder::new(128);
    let texts = vec![
        "the security deposit may not exceed three months".to_string(),
        "notice of termination must be written".to_string(),
    ];
    assert_eq!(a.embed(&texts).await.unwrap(), b.embed(&texts).await.unwrap());
}

#[tokio::test]
async fn identical_chats_replay_identically() {
    let dir = TempDir::new().unwrap();
    let config = AppConfig {
        data_dir: dir.path().join("data").to_string_lossy().into_owned(),
        ..AppConfig::default()
    };
    let app = App::open(config).unwrap();
    let kb = app.create_kb("default", None).unwrap();

    let source = dir.path().join("act.md");
    let mut file = std::fs::File::create(&source).unwrap();
    file.write_all(TENANCY_ACT.as_bytes()).unwrap();
    app.ingest(
        IngestRequest {
            kb_id: kb.id,
            source_uri: source.to_string_lossy().into_owned(),
            file_name: "act.md".into(),
            dry_run: false,
            force: false,
            profile: IngestProfile::default(),
        },
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let request = || ChatRequest {
        query: "What is the security deposit cap?".into(),
        kb_id: kb.id,
        conversation_id: None,
        debug: false,
        context: ChatContext::default(),
    };
    let first = app.chat(request(), &CancellationToken::new()).await.unwrap();
    let second = app.chat(request(), &CancellationToken::new()).await.unwrap();

    // Same answer, same citations, same verdict; only identities differ.
    assert_eq!(first.answer, second.answer);
    assert_eq!(first.status, second.status);
    assert_eq!(first.evaluator.status, second.evaluator.status);
    let first_cited: Vec<_> = first.citations.iter().map(|c| c.node_id).collect();
    let second_cited: Vec<_> = second.citations.iter().map(|c| c.node_id).collect();
    assert_eq!(first_cited, second_cited);

    // The persisted evaluator checks are byte-identical across the two runs.
    let eval_a = app
        .store
        .get_evaluation_record(first.records.evaluation_record_id.unwrap())
        .unwrap()
        .unwrap();
    let eval_b = app
        .store
        .get_evaluation_record(second.records.evaluation_record_id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(
        serde_json::to_string(&eval_a.checks).unwrap(),
        serde_json::to_string(&eval_b.checks).unwrap()
    );
    assert_eq!(eval_a.scores, eval_b.scores);
    assert_eq!(eval_a.status, eval_b.status);
}

#[tokio::test]
async fn forced_reingest_of_identical_content_is_stable() {
    let dir = TempDir::new().unwrap();
    let config = AppConfig {
        data_dir: dir.path().join("data").to_string_lossy().into_owned(),
        ..AppConfig::default()
    };
    let app = App::open(config).unwrap();
    let kb = app.create_kb("default", None).unwrap();

    let source = dir.path().join("act.md");
    let mut file = std::fs::File::create(&source).unwrap();
    file.write_all(TENANCY_ACT.as_bytes()).unwrap();
    let request = |force: bool| IngestRequest {
        kb_id: kb.id,
        source_uri: source.to_string_lossy().into_owned(),
        file_name: "act.md".into(),
        dry_run: false,
        force,
        profile: IngestProfile::default(),
    };

    let first = app.ingest(request(false), &CancellationToken::new()).await.unwrap();
    let nodes_before = app.store.nodes_for_file(first.file_id).unwrap();

    let second = app.ingest(request(true), &CancellationToken::new()).await.unwrap();
    let nodes_after = app.store.nodes_for_file(second.file_id).unwrap();

    // Node identities derive from (file_id, node_index), so a forced
    // re-ingest of identical content rewrites the same nodes in place.
    assert_eq!(first.file_id, second.file_id);
    let ids_before: Vec<_> = nodes_before.iter().map(|n| n.id).collect();
    let ids_after: Vec<_> = nodes_after.iter().map(|n| n.id).collect();
    assert_eq!(ids_before, ids_after);
    assert_eq!(
        nodes_before.iter().map(|n| &n.text).collect::<Vec<_>>(),
        nodes_after.iter().map(|n| &n.text).collect::<Vec<_>>()
    );
}
