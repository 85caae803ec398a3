//! Generation engine: prompt, call, post-process, record.

use chrono::Utc;
use gate::{GateCheck, GateReport, Stage};
use providers::{ChatOptions, ChatProvider};
use std::collections::HashMap;
use std::sync::Arc;
use store::{Citation, DocStore, GenerationRecord, GenerationStatus, Node, RetrievalHit};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::GenerationError;
use crate::postprocess::{align_citations, parse_structured};
use crate::prompt::{build_messages, resolve, EvidenceEntry};

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub message_id: Uuid,
    pub retrieval_record_id: Uuid,
    pub query: String,
    pub prompt_name: String,
    pub prompt_version: String,
}

/// What one generation produced; the record is always persisted, whatever
/// the status.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub record: GenerationRecord,
    pub citations: Vec<Citation>,
    pub gate: GateReport,
}

pub struct GenerationEngine {
    store: Arc<DocStore>,
}

impl GenerationEngine {
    pub fn new(store: Arc<DocStore>) -> Self {
        Self { store }
    }

    /// Run one generation over the current hit set.
    pub async fn generate(
        &self,
        chat: &dyn ChatProvider,
        req: &GenerationRequest,
        hits: &[RetrievalHit],
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, GenerationError> {
        let template = resolve(&req.prompt_name, &req.prompt_version)?;

        let span = tracing::info_span!("generation.run", message_id = %req.message_id, model = %chat.model());
        let _guard = span.enter();

        let node_ids: Vec<Uuid> = hits.iter().map(|h| h.node_id).collect();
        let nodes: HashMap<Uuid, Node> = self
            .store
            .get_nodes(&node_ids)?
            .into_iter()
            .map(|n| (n.id, n))
            .collect();

        let evidence: Vec<EvidenceEntry> = hits
            .iter()
            .enumerate()
            .map(|(idx, hit)| {
                let node = nodes.get(&hit.node_id);
                EvidenceEntry {
                    index: idx + 1,
                    node_id: hit.node_id,
                    page: hit.page,
                    article_id: node.and_then(|n| n.article_id.clone()),
                    section_path: node.and_then(|n| n.section_path.clone()),
                    excerpt: hit.excerpt.clone(),
                }
            })
            .collect();
        let messages = build_messages(template, &req.query, &evidence);
        let messages_snapshot =
            serde_json::to_value(&messages).unwrap_or(serde_json::Value::Null);

        let mut record = GenerationRecord {
            id: Uuid::new_v4(),
            message_id: req.message_id,
            retrieval_record_id: req.retrieval_record_id,
            prompt_name: req.prompt_name.clone(),
            prompt_version: req.prompt_version.clone(),
            model_provider: chat.name().to_string(),
            model_name: chat.model().to_string(),
            messages_snapshot,
            output_raw: String::new(),
            output_structured: None,
            citations: serde_json::Value::Array(Vec::new()),
            status: GenerationStatus::Failed,
            error_message: None,
            created_at: Utc::now(),
        };
        let mut checks = vec![if hits.is_empty() {
            GateCheck::fail("evidence_present", "no hits supplied")
        } else {
            GateCheck::pass("evidence_present").with_detail(format!("{} hits", hits.len()))
        }];

        let chat_options = ChatOptions::default();
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                record.error_message = Some("cancelled".into());
                checks.push(GateCheck::fail("model_call", "cancelled"));
                self.store.insert_generation_record(&record)?;
                warn!("generation cancelled");
                return Ok(GenerationOutcome {
                    record,
                    citations: Vec::new(),
                    gate: GateReport::from_checks(Stage::Generation, checks),
                });
            }
            result = chat.chat(&messages, &chat_options) => result,
        };

        let output = match output {
            Ok(output) => {
                checks.push(GateCheck::pass("model_call"));
                output
            }
            Err(err) => {
                record.error_message = Some(err.to_string());
                checks.push(GateCheck::fail("model_call", err.to_string()));
                self.store.insert_generation_record(&record)?;
                warn!(error = %err, "model call failed");
                return Ok(GenerationOutcome {
                    record,
                    citations: Vec::new(),
                    gate: GateReport::from_checks(Stage::Generation, checks),
                });
            }
        };
        record.output_raw = output.raw_text.clone();

        let citations = match parse_structured(&output.raw_text) {
            Err(reason) => {
                // Raw text is kept for the record; the evaluator will fail
                // require_citations downstream.
                record.status = GenerationStatus::Partial;
                record.error_message = Some(reason.clone());
                checks.push(GateCheck::warn("output_parsed", reason));
                Vec::new()
            }
            Ok(parsed) => {
                checks.push(GateCheck::pass("output_parsed"));
                record.output_structured = serde_json::to_value(&serde_json::json!({
                    "answer": parsed.answer,
                    "citations": parsed.citations.iter().map(|c| serde_json::json!({
                        "node_id": c.node_id,
                        "rank": c.rank,
                    })).collect::<Vec<_>>(),
                }))
                .ok();

                if hits.is_empty() && !parsed.answer.trim().is_empty() {
                    record.status = GenerationStatus::Failed;
                    record.error_message = Some("no_evidence_hallucination".into());
                    checks.push(GateCheck::fail(
                        "citations_aligned",
                        "answer produced without evidence",
                    ));
                    Vec::new()
                } else {
                    let alignment = align_citations(&parsed.citations, hits, &nodes);
                    if alignment.dropped > 0 {
                        let detail = format!("{} citations outside hit set dropped", alignment.dropped);
                        if alignment.citations.is_empty() {
                            record.status = GenerationStatus::Failed;
                            record.error_message = Some(detail.clone());
                            checks.push(GateCheck::fail("citations_aligned", detail));
                        } else {
                            record.status = GenerationStatus::Partial;
                            checks.push(GateCheck::warn("citations_aligned", detail));
                        }
                    } else {
                        record.status = GenerationStatus::Success;
                        checks.push(
                            GateCheck::pass("citations_aligned")
                                .with_detail(format!("{} citations", alignment.citations.len())),
                        );
                    }
                    alignment.citations
                }
            }
        };

        record.citations =
            serde_json::to_value(&citations).unwrap_or(serde_json::Value::Array(Vec::new()));
        self.store.insert_generation_record(&record)?;

        info!(
            status = ?record.status,
            citations = citations.len(),
            "generation_recorded"
        );
        Ok(GenerationOutcome {
            record,
            citations,
            gate: GateReport::from_checks(Stage::Generation, checks),
        })
    }
}
