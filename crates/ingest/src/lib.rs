//! Ingest engine: where documents enter the lexrag pipeline.
//!
//! One request ingests one file into one knowledge base, in four timed
//! stages: parse (markdown + page map), segment (structural pass then
//! sentence windows), embed (batched through the KB's embedding provider),
//! and persist. Persistence is ordered so that failure handling stays
//! simple: the vector batch lands first, then the relational write runs as
//! a single transaction; if the transaction fails the vectors are reaped as
//! orphans, so either both stores see the file or neither does.
//!
//! Re-ingesting a file with the same `(kb_id, sha256)` short-circuits to
//! the existing record unless `force` is set. Every run ends with a gate
//! report; a failed gate leaves the file in state `failed`.

mod error;
mod parser;
mod segment;
mod types;

pub use error::IngestError;
pub use parser::{parse, ParsedDocument, ParsedPage};
pub use segment::{segment, NodeDraft, SegmenterConfig};
pub use types::{IngestOutcome, IngestProfile, IngestRequest, ParserKind};

use chrono::Utc;
use gate::{CheckStatus, GateCheck, GateReport, Stage};
use providers::EmbedProvider;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use store::{
    DocStore, Document, IngestStatus, KnowledgeBase, KnowledgeFile, Node, NodeVectorMap,
    StageTimings,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use vector::{VectorPayload, VectorStore};

const EMBED_BATCH: usize = 32;

pub struct IngestEngine {
    store: Arc<DocStore>,
    vectors: Arc<VectorStore>,
}

impl IngestEngine {
    pub fn new(store: Arc<DocStore>, vectors: Arc<VectorStore>) -> Self {
        Self { store, vectors }
    }

    /// Run one ingest request end to end.
    ///
    /// `Err` covers input problems (unknown KB, unreadable source, embedder
    /// mismatch) and cancellation; stage failures after the file record
    /// exists are reported through the outcome's gate report with the file
    /// left in state `failed`.
    pub async fn ingest_file(
        &self,
        embedder: &dyn EmbedProvider,
        req: IngestRequest,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome, IngestError> {
        if req.file_name.trim().is_empty() {
            return Err(IngestError::InvalidRequest("file_name must not be empty".into()));
        }
        if req.source_uri.trim().is_empty() {
            return Err(IngestError::InvalidRequest("source_uri must not be empty".into()));
        }

        let kb = self
            .store
            .get_kb(req.kb_id)?
            .ok_or(IngestError::KbNotFound(req.kb_id))?;
        if embedder.dim() != kb.embed_dim {
            return Err(IngestError::InvalidRequest(format!(
                "embedder dimension {} does not match KB embedding dimension {}",
                embedder.dim(),
                kb.embed_dim
            )));
        }

        let span = tracing::info_span!("ingest.file", kb_id = %kb.id, file_name = %req.file_name);
        let _guard = span.enter();

        let bytes = std::fs::read(&req.source_uri).map_err(|e| IngestError::Io {
            uri: req.source_uri.clone(),
            reason: e.to_string(),
        })?;
        let sha256 = hex_digest(&bytes);
        let raw = String::from_utf8(bytes)
            .map_err(|_| IngestError::Parse("source is not valid UTF-8 text".into()))?;

        let existing = self.store.find_file_by_sha(kb.id, &sha256)?;
        if let Some(existing) = &existing {
            if existing.ingest_status == IngestStatus::Success && !req.force && !req.dry_run {
                info!(file_id = %existing.id, "ingest short-circuited on (kb_id, sha256)");
                return Ok(IngestOutcome {
                    file_id: existing.id,
                    ingest_status: existing.ingest_status,
                    node_count: existing.node_count,
                    pages: existing.pages,
                    timings: existing.timings,
                    gate: GateReport::from_checks(
                        Stage::Ingest,
                        vec![GateCheck::pass("idempotent_short_circuit")
                            .with_detail(format!("sha256 {sha256} already ingested"))],
                    ),
                    short_circuited: true,
                    dry_run: false,
                });
            }
        }

        let mut timings = StageTimings::default();
        let mut checks = Vec::new();

        // Parse.
        let started = Instant::now();
        let parsed = parse(&raw, req.profile.parser)?;
        timings.parse_ms = started.elapsed().as_millis() as u64;
        let pages = parsed.page_count();
        checks.push(GateCheck::pass("parse").with_detail(format!("{pages} pages")));

        // Segment.
        let seg_cfg = SegmenterConfig {
            sentence_window: req.profile.sentence_window.unwrap_or(kb.chunking.sentence_window),
            min_node_chars: req.profile.min_node_chars.unwrap_or(kb.chunking.min_node_chars),
            segment_version: req
                .profile
                .segment_version
                .clone()
                .unwrap_or_else(|| "seg-v1".into()),
        };
        let started = Instant::now();
        let drafts = segment(&parsed, &seg_cfg);
        timings.segment_ms = started.elapsed().as_millis() as u64;

        let length_check = segment_check(&drafts, &seg_cfg);
        let length_ok = length_check.status != CheckStatus::Fail;
        checks.push(length_check);

        if req.dry_run {
            let gate = GateReport::from_checks(Stage::Ingest, checks);
            let status = if gate.failed() {
                IngestStatus::Failed
            } else {
                IngestStatus::Success
            };
            return Ok(IngestOutcome {
                file_id: Uuid::nil(),
                ingest_status: status,
                node_count: drafts.len() as u32,
                pages,
                timings,
                gate,
                short_circuited: false,
                dry_run: true,
            });
        }

        // Claim (or reclaim) the file record before any side effects land.
        let file_id = match &existing {
            Some(existing) => {
                self.store.delete_file_contents(existing.id)?;
                if let Err(err) = self.vectors.delete_file(kb.id, existing.id) {
                    warn!(error = %err, "stale vectors could not be reaped before re-ingest");
                }
                existing.id
            }
            None => Uuid::new_v4(),
        };
        let mut file = KnowledgeFile {
            id: file_id,
            kb_id: kb.id,
            file_name: req.file_name.clone(),
            sha256,
            ingest_status: IngestStatus::Pending,
            pages,
            node_count: 0,
            timings,
            error: None,
            created_at: existing.as_ref().map(|f| f.created_at).unwrap_or_else(Utc::now),
        };
        if existing.is_some() {
            self.store.update_file(&file)?;
        } else {
            self.store.insert_file(&file)?;
        }

        if drafts.is_empty() {
            checks.push(GateCheck::fail("nodes_nonempty", "segmentation produced no nodes"));
            return self.fail(file, checks, "segmentation produced no nodes");
        }
        checks.push(GateCheck::pass("nodes_nonempty").with_detail(format!("{} nodes", drafts.len())));
        if !length_ok {
            return self.fail(file, checks, "nodes below minimum text length");
        }

        // Embed.
        let started = Instant::now();
        let texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
        let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH) {
            if cancel.is_cancelled() {
                self.record_failure(&mut file, "cancelled")?;
                return Err(IngestError::Cancelled);
            }
            match embedder.embed(batch).await {
                Ok(vectors) => embeddings.extend(vectors),
                Err(err) => {
                    checks.push(GateCheck::fail("embed", err.to_string()));
                    return self.fail(file, checks, &err.to_string());
                }
            }
        }
        file.timings.embed_ms = started.elapsed().as_millis() as u64;

        if embeddings.len() != drafts.len() {
            let detail = format!("{} embeddings for {} nodes", embeddings.len(), drafts.len());
            checks.push(GateCheck::fail("embedding_count", detail.clone()));
            return self.fail(file, checks, &detail);
        }
        if let Some(bad) = embeddings.iter().find(|v| v.len() != kb.embed_dim) {
            let detail = format!("embedding dimension {} != {}", bad.len(), kb.embed_dim);
            checks.push(GateCheck::fail("embedding_dim", detail.clone()));
            return self.fail(file, checks, &detail);
        }
        checks.push(GateCheck::pass("embedding_count").with_detail(format!(
            "{} vectors via {}/{}",
            embeddings.len(),
            embedder.name(),
            embedder.model()
        )));

        let (document, nodes, payloads, maps) =
            materialize(&kb, &file, &req, &parsed, drafts, embeddings);

        // Persist: vectors first, then the store transaction. A failed
        // transaction turns the batch into orphans, which we reap here.
        let started = Instant::now();
        if let Err(err) = self.vectors.insert_batch(payloads) {
            checks.push(GateCheck::fail("vector_write", err.to_string()));
            return self.fail(file, checks, &err.to_string());
        }
        file.timings.vector_ms = started.elapsed().as_millis() as u64;

        file.ingest_status = IngestStatus::Success;
        file.node_count = nodes.len() as u32;
        let started = Instant::now();
        if let Err(err) = self.store.persist_ingest(&file, &document, &nodes, &maps) {
            if let Err(reap_err) = self.vectors.delete_file(kb.id, file.id) {
                warn!(error = %reap_err, "orphan vectors left behind after failed persist");
            }
            checks.push(GateCheck::fail("db_write", err.to_string()));
            return self.fail(file, checks, &err.to_string());
        }
        file.timings.db_ms = started.elapsed().as_millis() as u64;
        // Refresh the stored row with the final timings.
        self.store.update_file(&file)?;

        checks.push(GateCheck::pass("persisted"));
        let gate = GateReport::from_checks(Stage::Ingest, checks);
        info!(
            file_id = %file.id,
            nodes = file.node_count,
            pages = file.pages,
            parse_ms = file.timings.parse_ms,
            segment_ms = file.timings.segment_ms,
            embed_ms = file.timings.embed_ms,
            vector_ms = file.timings.vector_ms,
            db_ms = file.timings.db_ms,
            "ingest_success"
        );

        Ok(IngestOutcome {
            file_id: file.id,
            ingest_status: IngestStatus::Success,
            node_count: file.node_count,
            pages: file.pages,
            timings: file.timings,
            gate,
            short_circuited: false,
            dry_run: false,
        })
    }

    fn record_failure(&self, file: &mut KnowledgeFile, reason: &str) -> Result<(), IngestError> {
        file.ingest_status = IngestStatus::Failed;
        file.error = Some(reason.to_string());
        self.store.update_file(file)?;
        Ok(())
    }

    fn fail(
        &self,
        mut file: KnowledgeFile,
        checks: Vec<GateCheck>,
        reason: &str,
    ) -> Result<IngestOutcome, IngestError> {
        warn!(file_id = %file.id, reason, "ingest_failure");
        self.record_failure(&mut file, reason)?;
        Ok(IngestOutcome {
            file_id: file.id,
            ingest_status: IngestStatus::Failed,
            node_count: 0,
            pages: file.pages,
            timings: file.timings,
            gate: GateReport::from_checks(Stage::Ingest, checks),
            short_circuited: false,
            dry_run: false,
        })
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn segment_check(drafts: &[NodeDraft], cfg: &SegmenterConfig) -> GateCheck {
    let undersized = drafts
        .iter()
        .filter(|d| d.text.trim().chars().count() < cfg.min_node_chars)
        .count();
    if undersized > 0 {
        GateCheck::fail(
            "min_text_length",
            format!("{undersized} nodes below {} chars", cfg.min_node_chars),
        )
    } else {
        GateCheck::pass("min_text_length")
    }
}

/// Give drafts their identities. Node and vector ids are UUIDv5 of the file
/// id and position, so a forced re-ingest of identical content is stable.
fn materialize(
    kb: &KnowledgeBase,
    file: &KnowledgeFile,
    req: &IngestRequest,
    parsed: &ParsedDocument,
    drafts: Vec<NodeDraft>,
    embeddings: Vec<Vec<f32>>,
) -> (Document, Vec<Node>, Vec<VectorPayload>, Vec<NodeVectorMap>) {
    let document = Document {
        id: Uuid::new_v5(&file.id, b"document"),
        kb_id: kb.id,
        file_id: file.id,
        title: Some(
            req.file_name
                .rsplit_once('.')
                .map(|(stem, _)| stem.to_string())
                .unwrap_or_else(|| req.file_name.clone()),
        ),
        pages: parsed.page_count(),
        parser: req.profile.parser.as_str().to_string(),
        parser_version: req.profile.parse_version.clone(),
    };

    let mut nodes = Vec::with_capacity(drafts.len());
    let mut payloads = Vec::with_capacity(drafts.len());
    let mut maps = Vec::with_capacity(drafts.len());
    for (idx, (draft, embedding)) in drafts.into_iter().zip(embeddings).enumerate() {
        let node_id = Uuid::new_v5(&file.id, format!("node-{idx}").as_bytes());
        let vector_id = Uuid::new_v5(&file.id, format!("vector-{idx}").as_bytes());
        payloads.push(VectorPayload {
            vector_id,
            embedding,
            node_id,
            kb_id: kb.id,
            file_id: file.id,
            document_id: document.id,
            page: draft.page,
            article_id: draft.article_id.clone(),
            section_path: draft.section_path.clone(),
        });
        maps.push(NodeVectorMap {
            node_id,
            vector_id,
            kb_id: kb.id,
        });
        nodes.push(Node {
            id: node_id,
            kb_id: kb.id,
            file_id: file.id,
            document_id: document.id,
            node_index: idx as u32,
            text: draft.text,
            page: draft.page,
            article_id: draft.article_id,
            section_path: draft.section_path,
            start_offset: Some(draft.start_offset),
            end_offset: Some(draft.end_offset),
            meta: draft.meta,
        });
    }
    (document, nodes, payloads, maps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate::GateStatus;
    use providers::StubEmbedder;
    use std::io::Write;
    use store::ChunkingConfig;
    use tempfile::TempDir;

    const SAMPLE: &str = "# Tenancy Act\n\n## Article 3\n\nThe security deposit may not exceed three months of rent. \
The landlord must return the deposit within one month of termination.\n\n## Article 4\n\nNotice of termination must be \
given in writing at least three months before the end of the rental period.";

    struct Fixture {
        _dir: TempDir,
        engine: IngestEngine,
        store: Arc<DocStore>,
        vectors: Arc<VectorStore>,
        kb: KnowledgeBase,
        source: std::path::PathBuf,
    }

    fn fixture(content: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(DocStore::open(dir.path().join("store.redb")).unwrap());
        let vectors = Arc::new(VectorStore::open(dir.path().join("vectors.redb")).unwrap());
        let kb = KnowledgeBase {
            id: Uuid::new_v4(),
            name: "default".into(),
            collection: "default_vectors".into(),
            embed_provider: "stub".into(),
            embed_model: "stub-embed-v1".into(),
            embed_dim: 64,
            chunking: ChunkingConfig::default(),
            created_at: Utc::now(),
        };
        store.create_kb(&kb).unwrap();
        let source = dir.path().join("act.md");
        let mut f = std::fs::File::create(&source).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        Fixture {
            engine: IngestEngine::new(store.clone(), vectors.clone()),
            _dir: dir,
            store,
            vectors,
            kb,
            source,
        }
    }

    fn request(fx: &Fixture) -> IngestRequest {
        IngestRequest {
            kb_id: fx.kb.id,
            source_uri: fx.source.to_string_lossy().into_owned(),
            file_name: "act.md".into(),
            dry_run: false,
            force: false,
            profile: IngestProfile::default(),
        }
    }

    #[tokio::test]
    async fn ingest_success_populates_both_stores() {
        let fx = fixture(SAMPLE);
        let embedder = StubEmbedder::new(64);
        let outcome = fx
            .engine
            .ingest_file(&embedder, request(&fx), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.ingest_status, IngestStatus::Success);
        assert!(outcome.node_count > 0);
        assert_eq!(outcome.gate.status, GateStatus::Pass);

        let nodes = fx.store.nodes_for_file(outcome.file_id).unwrap();
        assert_eq!(nodes.len() as u32, outcome.node_count);
        for (idx, node) in nodes.iter().enumerate() {
            assert_eq!(node.node_index as usize, idx);
            assert!(node.text.trim().chars().count() >= 24);
        }
        assert_eq!(fx.vectors.count_for_kb(fx.kb.id), nodes.len());

        let hits = fx
            .store
            .search_nodes_by_keyword(fx.kb.id, "security deposit", 5)
            .unwrap();
        assert!(!hits.is_empty());
    }

    #[tokio::test]
    async fn reingest_same_sha_short_circuits() {
        let fx = fixture(SAMPLE);
        let embedder = StubEmbedder::new(64);
        let first = fx
            .engine
            .ingest_file(&embedder, request(&fx), &CancellationToken::new())
            .await
            .unwrap();
        let second = fx
            .engine
            .ingest_file(&embedder, request(&fx), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(first.file_id, second.file_id);
        assert!(second.short_circuited);
        assert_eq!(second.node_count, first.node_count);
        assert_eq!(
            fx.store.nodes_for_file(first.file_id).unwrap().len() as u32,
            first.node_count
        );
    }

    #[tokio::test]
    async fn force_reingest_keeps_file_id_and_counts() {
        let fx = fixture(SAMPLE);
        let embedder = StubEmbedder::new(64);
        let first = fx
            .engine
            .ingest_file(&embedder, request(&fx), &CancellationToken::new())
            .await
            .unwrap();
        let mut req = request(&fx);
        req.force = true;
        let second = fx
            .engine
            .ingest_file(&embedder, req, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(first.file_id, second.file_id);
        assert!(!second.short_circuited);
        assert_eq!(second.node_count, first.node_count);
        assert_eq!(fx.vectors.count_for_kb(fx.kb.id) as u32, second.node_count);
    }

    #[tokio::test]
    async fn dry_run_persists_nothing() {
        let fx = fixture(SAMPLE);
        let embedder = StubEmbedder::new(64);
        let mut req = request(&fx);
        req.dry_run = true;
        let outcome = fx
            .engine
            .ingest_file(&embedder, req, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.dry_run);
        assert!(outcome.node_count > 0);
        assert_eq!(fx.vectors.count_for_kb(fx.kb.id), 0);
        assert!(fx
            .store
            .search_nodes_by_keyword(fx.kb.id, "deposit", 5)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn failing_embedder_marks_file_failed() {
        struct BrokenEmbedder;

        #[async_trait::async_trait]
        impl EmbedProvider for BrokenEmbedder {
            fn name(&self) -> &str {
                "broken"
            }
            fn model(&self) -> &str {
                "broken"
            }
            fn dim(&self) -> usize {
                64
            }
            async fn embed(
                &self,
                _texts: &[String],
            ) -> Result<Vec<Vec<f32>>, providers::ProviderError> {
                Err(providers::ProviderError::Http("connection refused".into()))
            }
        }

        let fx = fixture(SAMPLE);
        let outcome = fx
            .engine
            .ingest_file(&BrokenEmbedder, request(&fx), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.ingest_status, IngestStatus::Failed);
        assert_eq!(outcome.gate.status, GateStatus::Fail);
        let file = fx.store.get_file(outcome.file_id).unwrap().unwrap();
        assert_eq!(file.ingest_status, IngestStatus::Failed);
        assert!(file.error.unwrap().contains("connection refused"));
        // Nothing was persisted to either store.
        assert!(fx.store.nodes_for_file(outcome.file_id).unwrap().is_empty());
        assert_eq!(fx.vectors.count_for_kb(fx.kb.id), 0);
    }

    #[tokio::test]
    async fn cancelled_ingest_marks_file_failed() {
        let fx = fixture(SAMPLE);
        let embedder = StubEmbedder::new(64);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fx
            .engine
            .ingest_file(&embedder, request(&fx), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Cancelled));
    }

    #[tokio::test]
    async fn unknown_kb_is_an_input_error() {
        let fx = fixture(SAMPLE);
        let embedder = StubEmbedder::new(64);
        let mut req = request(&fx);
        req.kb_id = Uuid::new_v4();
        assert!(matches!(
            fx.engine
                .ingest_file(&embedder, req, &CancellationToken::new())
                .await,
            Err(IngestError::KbNotFound(_))
        ));
    }

    #[tokio::test]
    async fn mismatched_embedder_dim_rejected() {
        let fx = fixture(SAMPLE);
        let embedder = StubEmbedder::new(32);
        assert!(matches!(
            fx.engine
                .ingest_file(&embedder, request(&fx), &CancellationToken::new())
                .await,
            Err(IngestError::InvalidRequest(_))
        ));
    }

    #[test]
    fn sha256_digest_is_stable() {
        assert_eq!(
            hex_digest(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
