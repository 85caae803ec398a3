//! Retrieval engine: recall in parallel, fuse, optionally rerank, persist.

use chrono::Utc;
use gate::{GateCheck, GateReport, Stage};
use providers::{ChatProvider, EmbedProvider, RerankProvider};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use store::{DocStore, RetrievalHit, RetrievalRecord, BM25_NORMALIZER};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use vector::{KbScope, VectorStore};

use crate::error::RetrievalError;
use crate::fusion;
use crate::rerank::{rerank_cross, rerank_llm};
use crate::types::{Candidate, RecallStage, RerankStrategy, RetrievalOptions};

/// Providers a single retrieval run may need. The embedder is mandatory;
/// rerankers are only consulted for their strategies.
pub struct RetrievalProviders<'a> {
    pub embedder: &'a dyn EmbedProvider,
    pub reranker: Option<&'a dyn RerankProvider>,
    pub chat: Option<&'a dyn ChatProvider>,
}

#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub message_id: Uuid,
    pub kb_id: Uuid,
    pub query: String,
    pub options: RetrievalOptions,
}

/// What one retrieval produced. `hits` is the final list handed to
/// generation; the persisted record may additionally carry intermediate
/// -stage hits when the request asked for them.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub record: RetrievalRecord,
    pub hits: Vec<RetrievalHit>,
    pub gate: GateReport,
}

pub struct RetrievalEngine {
    store: Arc<DocStore>,
    vectors: Arc<VectorStore>,
}

impl RetrievalEngine {
    pub fn new(store: Arc<DocStore>, vectors: Arc<VectorStore>) -> Self {
        Self { store, vectors }
    }

    /// Run one retrieval. Keyword and vector recall execute in parallel and
    /// join before fusion; a cancellation landing before that join aborts
    /// without persisting anything.
    pub async fn retrieve(
        &self,
        providers: &RetrievalProviders<'_>,
        req: &RetrievalRequest,
        cancel: &CancellationToken,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        req.options.validate().map_err(RetrievalError::InvalidOptions)?;
        match req.options.rerank_strategy {
            RerankStrategy::CrossEncoder if providers.reranker.is_none() => {
                return Err(RetrievalError::InvalidOptions(
                    "cross_encoder rerank requested but no rerank provider configured".into(),
                ))
            }
            RerankStrategy::Llm if providers.chat.is_none() => {
                return Err(RetrievalError::InvalidOptions(
                    "llm rerank requested but no chat provider configured".into(),
                ))
            }
            _ => {}
        }

        let span = tracing::info_span!("retrieval.run", kb_id = %req.kb_id, message_id = %req.message_id);
        let _guard = span.enter();
        let started = Instant::now();

        if store::query_terms(&req.query).is_empty() {
            let record = self.build_record(providers, req, started.elapsed().as_millis() as u64);
            self.store.insert_retrieval_record(&record, &[])?;
            warn!(query = %req.query, "weak query, nothing searchable");
            return Ok(RetrievalOutcome {
                record,
                hits: Vec::new(),
                gate: GateReport::from_checks(
                    Stage::Retrieval,
                    vec![GateCheck::fail("weak_query", "query contains no searchable terms")],
                ),
            });
        }

        let recall = async {
            tokio::join!(
                self.keyword_recall(req.kb_id, &req.query, req.options.keyword_top_k),
                self.vector_recall(providers.embedder, req.kb_id, &req.query, req.options.vector_top_k),
            )
        };
        let (keyword_res, vector_res) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetrievalError::Cancelled),
            results = recall => results,
        };

        let mut checks = Vec::new();
        let (keyword, keyword_err) = match keyword_res {
            Ok(candidates) => {
                let check = if req.options.keyword_top_k == 0 {
                    GateCheck::skipped("keyword_recall")
                } else {
                    GateCheck::pass("keyword_recall").with_detail(format!("{} candidates", candidates.len()))
                };
                checks.push(check);
                (candidates, None)
            }
            Err(err) => {
                warn!(error = %err, "keyword recall failed");
                checks.push(GateCheck::warn("keyword_recall", err.to_string()));
                (Vec::new(), Some(err))
            }
        };
        let (vector, vector_err) = match vector_res {
            Ok(candidates) => {
                let check = if req.options.vector_top_k == 0 {
                    GateCheck::skipped("vector_recall")
                } else {
                    GateCheck::pass("vector_recall").with_detail(format!("{} candidates", candidates.len()))
                };
                checks.push(check);
                (candidates, None)
            }
            Err(err) => {
                warn!(error = %err, "vector recall failed");
                checks.push(GateCheck::warn("vector_recall", err.to_string()));
                (Vec::new(), Some(err))
            }
        };
        // One failed side degrades; both failing is an external failure the
        // caller must see.
        if keyword.is_empty() && vector.is_empty() {
            if let Some(err) = keyword_err.or(vector_err) {
                return Err(err);
            }
        }

        let fused = fusion::fuse(&keyword, &vector, &req.options);
        if fused.is_empty() {
            checks.push(GateCheck::fail("evidence_found", "no_evidence"));
            let record = self.build_record(providers, req, started.elapsed().as_millis() as u64);
            self.store.insert_retrieval_record(&record, &[])?;
            info!("retrieval found no evidence");
            return Ok(RetrievalOutcome {
                record,
                hits: Vec::new(),
                gate: GateReport::from_checks(Stage::Retrieval, checks),
            });
        }
        checks.push(GateCheck::pass("evidence_found").with_detail(format!("{} fused candidates", fused.len())));

        let final_candidates = match req.options.rerank_strategy {
            RerankStrategy::None => fused.clone(),
            RerankStrategy::CrossEncoder => {
                let reranker = providers.reranker.ok_or_else(|| {
                    RetrievalError::InvalidOptions("rerank provider missing".into())
                })?;
                match rerank_cross(reranker, &req.query, fused.clone(), req.options.rerank_top_k).await {
                    Ok(reranked) => {
                        checks.push(GateCheck::pass("rerank"));
                        reranked
                    }
                    Err(err) => {
                        warn!(error = %err, "rerank degraded to fused order");
                        checks.push(GateCheck::warn("rerank", err.to_string()));
                        fused.clone().into_iter().take(req.options.rerank_top_k).collect()
                    }
                }
            }
            RerankStrategy::Llm => {
                let chat = providers.chat.ok_or_else(|| {
                    RetrievalError::InvalidOptions("chat provider missing".into())
                })?;
                match rerank_llm(chat, &req.query, fused.clone(), req.options.rerank_top_k).await {
                    Ok(reranked) => {
                        checks.push(GateCheck::pass("rerank"));
                        reranked
                    }
                    Err(err) => {
                        warn!(error = %err, "rerank degraded to fused order");
                        checks.push(GateCheck::warn("rerank", err.to_string()));
                        fused.clone().into_iter().take(req.options.rerank_top_k).collect()
                    }
                }
            }
        };

        let record = self.build_record(providers, req, started.elapsed().as_millis() as u64);
        let mut persisted: Vec<RetrievalHit> = Vec::new();
        if req.options.persist_intermediate {
            persisted.extend(
                keyword
                    .iter()
                    .enumerate()
                    .map(|(idx, c)| c.to_hit(record.id, idx as u32 + 1)),
            );
            persisted.extend(
                vector
                    .iter()
                    .enumerate()
                    .map(|(idx, c)| c.to_hit(record.id, idx as u32 + 1)),
            );
        }
        let final_hits: Vec<RetrievalHit> = final_candidates
            .iter()
            .enumerate()
            .map(|(idx, c)| c.to_hit(record.id, idx as u32 + 1))
            .collect();
        persisted.extend(final_hits.clone());
        self.store.insert_retrieval_record(&record, &persisted)?;

        info!(
            hits = final_hits.len(),
            timing_ms = record.timing_ms,
            fusion = req.options.fusion_strategy.as_str(),
            rerank = req.options.rerank_strategy.as_str(),
            "retrieval_success"
        );
        Ok(RetrievalOutcome {
            record,
            hits: final_hits,
            gate: GateReport::from_checks(Stage::Retrieval, checks),
        })
    }

    async fn keyword_recall(
        &self,
        kb_id: Uuid,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Candidate>, RetrievalError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let hits = self.store.search_nodes_by_keyword(kb_id, query, top_k)?;
        let ids: Vec<Uuid> = hits.iter().map(|h| h.node_id).collect();
        let nodes = self.store.get_nodes(&ids)?;
        let by_id: std::collections::HashMap<Uuid, &store::Node> =
            nodes.iter().map(|n| (n.id, n)).collect();

        Ok(hits
            .iter()
            .filter_map(|hit| {
                by_id.get(&hit.node_id).map(|node| {
                    Candidate::from_node(
                        node,
                        RecallStage::Keyword,
                        hit.score,
                        json!({
                            "bm25_raw": hit.raw_score,
                            "normalizer": BM25_NORMALIZER,
                        }),
                    )
                })
            })
            .collect())
    }

    async fn vector_recall(
        &self,
        embedder: &dyn EmbedProvider,
        kb_id: Uuid,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Candidate>, RetrievalError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let mut embeddings = embedder.embed(&[query.to_string()]).await?;
        let query_vector = embeddings.pop().ok_or_else(|| {
            RetrievalError::Embed(providers::ProviderError::UnexpectedResponse(
                "embedder returned no vector for the query".into(),
            ))
        })?;

        let hits = self.vectors.search(KbScope::kb(kb_id), &query_vector, top_k)?;
        let ids: Vec<Uuid> = hits.iter().map(|h| h.payload.node_id).collect();
        let nodes = self.store.get_nodes(&ids)?;
        let by_id: std::collections::HashMap<Uuid, &store::Node> =
            nodes.iter().map(|n| (n.id, n)).collect();

        Ok(hits
            .iter()
            .filter_map(|hit| {
                by_id.get(&hit.payload.node_id).map(|node| {
                    Candidate::from_node(
                        node,
                        RecallStage::Vector,
                        hit.score,
                        json!({ "metric_type": hit.metric.to_string() }),
                    )
                })
            })
            .collect())
    }

    fn build_record(
        &self,
        providers: &RetrievalProviders<'_>,
        req: &RetrievalRequest,
        timing_ms: u64,
    ) -> RetrievalRecord {
        let mut snapshot = json!({ "embed": providers.embedder.snapshot() });
        match req.options.rerank_strategy {
            RerankStrategy::CrossEncoder => {
                if let Some(reranker) = providers.reranker {
                    snapshot["rerank"] = json!({
                        "provider": reranker.name(),
                        "model": reranker.model(),
                    });
                }
            }
            RerankStrategy::Llm => {
                if let Some(chat) = providers.chat {
                    snapshot["rerank"] = json!({
                        "provider": chat.name(),
                        "model": chat.model(),
                    });
                }
            }
            RerankStrategy::None => {}
        }
        RetrievalRecord {
            id: Uuid::new_v4(),
            message_id: req.message_id,
            kb_id: req.kb_id,
            query_text: req.query.clone(),
            keyword_top_k: req.options.keyword_top_k,
            vector_top_k: req.options.vector_top_k,
            fusion_top_k: req.options.fusion_top_k,
            rerank_top_k: req.options.rerank_top_k,
            fusion_strategy: req.options.fusion_strategy.as_str().to_string(),
            rerank_strategy: req.options.rerank_strategy.as_str().to_string(),
            provider_snapshot: snapshot,
            timing_ms,
            created_at: Utc::now(),
        }
    }
}
