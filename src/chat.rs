//! Chat orchestrator: compose retrieval → generation → evaluation under the
//! gate kernel and produce the user-facing reply envelope.
//!
//! The message row is the single observable truth of the outcome: it is
//! created `pending`, and ends `success`, `failed`, or `blocked` depending
//! on the gates and the evaluator verdict. Record IDs are always returned,
//! even when the answer is withheld, so a caller can show an explanation.

use chrono::Utc;
use evaluator::{EvaluatorConfig, EvaluatorInput, RULE_VERSION};
use gate::{downstream_permitted, CheckStatus, GateStatus, Stage};
use generation::{GenerationEngine, GenerationRequest};
use retrieval::{
    FusionStrategy, RerankStrategy, RetrievalEngine, RetrievalOptions, RetrievalProviders,
    RetrievalRequest,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use store::{
    Citation, Conversation, DocStore, EvaluationRecord, KnowledgeBase, Message, MessageStatus,
    RetrievalHit,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use vector::VectorStore;

use crate::config::{AppConfig, ProviderRegistry};
use crate::error::CoreError;

const REFUSAL: &str =
    "I cannot provide a grounded answer to this question from the current knowledge base.";

/// Recognized per-request options; unknown keys land in `extra` and are
/// carried through to the evaluation record's metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatContext {
    #[serde(default)]
    pub keyword_top_k: Option<usize>,
    #[serde(default)]
    pub vector_top_k: Option<usize>,
    #[serde(default)]
    pub fusion_top_k: Option<usize>,
    #[serde(default)]
    pub rerank_top_k: Option<usize>,
    #[serde(default)]
    pub fusion_strategy: Option<String>,
    #[serde(default)]
    pub rerank_strategy: Option<String>,
    #[serde(default)]
    pub embed_provider: Option<String>,
    #[serde(default)]
    pub embed_model: Option<String>,
    #[serde(default)]
    pub embed_dim: Option<usize>,
    #[serde(default)]
    pub model_provider: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub prompt_name: Option<String>,
    #[serde(default)]
    pub prompt_version: Option<String>,
    #[serde(default)]
    pub evaluator_config: Option<serde_json::Value>,
    #[serde(default)]
    pub return_records: Option<bool>,
    #[serde(default)]
    pub return_hits: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    pub kb_id: Uuid,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub context: ChatContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluatorSummary {
    pub status: GateStatus,
    pub rule_version: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordIds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_record_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_record_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_record_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatDebug {
    pub hits: Vec<RetrievalHit>,
    pub provider_snapshot: serde_json::Value,
    pub timing_ms: u64,
}

/// The user-facing envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub kb_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
    pub reasons: Vec<String>,
    pub citations: Vec<Citation>,
    pub evaluator: EvaluatorSummary,
    pub records: RecordIds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<ChatDebug>,
}

pub struct ChatEngine {
    store: Arc<DocStore>,
    retrieval: RetrievalEngine,
    generation: GenerationEngine,
    registry: Arc<ProviderRegistry>,
    config: AppConfig,
}

impl ChatEngine {
    pub fn new(
        store: Arc<DocStore>,
        vectors: Arc<VectorStore>,
        registry: Arc<ProviderRegistry>,
        config: AppConfig,
    ) -> Self {
        Self {
            retrieval: RetrievalEngine::new(store.clone(), vectors),
            generation: GenerationEngine::new(store.clone()),
            store,
            registry,
            config,
        }
    }

    /// Single public entry: one chat turn.
    pub async fn chat(
        &self,
        req: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatReply, CoreError> {
        if req.query.trim().is_empty() {
            return Err(CoreError::BadRequest("query must not be empty".into()));
        }
        let kb = self
            .store
            .get_kb(req.kb_id)?
            .ok_or_else(|| CoreError::NotFound(format!("knowledge base {}", req.kb_id)))?;

        let options = self.resolve_options(&req)?;
        let embedder = self.resolve_embedder(&kb, &req.context)?;
        let chat_provider = {
            let name = req
                .context
                .model_provider
                .clone()
                .unwrap_or_else(|| self.config.default_chat_provider.clone());
            let provider = self.registry.chat(&name)?;
            if let Some(model) = &req.context.model_name {
                if model != provider.model() {
                    return Err(CoreError::BadRequest(format!(
                        "model '{model}' is not served by provider '{name}'"
                    )));
                }
            }
            provider
        };
        let reranker = match options.rerank_strategy {
            RerankStrategy::CrossEncoder => Some(match self.registry.default_reranker() {
                Some(reranker) => reranker,
                None => {
                    return Err(CoreError::BadRequest(
                        "cross_encoder rerank requested but no rerank provider configured".into(),
                    ))
                }
            }),
            _ => None,
        };
        let evaluator_cfg = self.resolve_evaluator_config(&req.context)?;

        let span = tracing::info_span!("chat.turn", kb_id = %kb.id);
        let _guard = span.enter();

        // 1. The message row is created pending before anything runs.
        let conversation_id = self.resolve_conversation(&req, &kb)?;
        let message_id = Uuid::new_v4();
        let mut message = Message {
            id: message_id,
            conversation_id,
            kb_id: kb.id,
            query_text: req.query.clone(),
            answer: None,
            status: MessageStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.insert_message(&message)?;

        // 2. Retrieval.
        let retrieval_req = RetrievalRequest {
            message_id,
            kb_id: kb.id,
            query: req.query.clone(),
            options: options.clone(),
        };
        let retrieval_providers = RetrievalProviders {
            embedder: embedder.as_ref(),
            reranker: reranker.as_deref(),
            chat: Some(chat_provider.as_ref()),
        };
        let retrieval_outcome = match self
            .retrieval
            .retrieve(&retrieval_providers, &retrieval_req, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                let core: CoreError = err.into();
                warn!(error = %core, "retrieval failed hard");
                message.status = MessageStatus::Failed;
                message.updated_at = Utc::now();
                self.store.update_message(&message)?;
                return Err(core);
            }
        };
        let records_so_far = RecordIds {
            retrieval_record_id: Some(retrieval_outcome.record.id),
            ..Default::default()
        };

        // Retrieval gate failing blocks generation entirely.
        if !downstream_permitted(Stage::Retrieval, retrieval_outcome.gate.status) {
            return self.block_on_retrieval(
                req,
                kb.id,
                conversation_id,
                message,
                retrieval_outcome,
                &evaluator_cfg,
                records_so_far,
            );
        }

        // 3. Generation. A failing generation gate does not block the
        // evaluator; it must be able to record the failure.
        let generation_req = GenerationRequest {
            message_id,
            retrieval_record_id: retrieval_outcome.record.id,
            query: req.query.clone(),
            prompt_name: req
                .context
                .prompt_name
                .clone()
                .unwrap_or_else(|| self.config.prompt_name.clone()),
            prompt_version: req
                .context
                .prompt_version
                .clone()
                .unwrap_or_else(|| self.config.prompt_version.clone()),
        };
        let generation_outcome = self
            .generation
            .generate(
                chat_provider.as_ref(),
                &generation_req,
                &retrieval_outcome.hits,
                cancel,
            )
            .await?;

        // 4. Evaluation.
        let structured_answer = generation_outcome
            .record
            .output_structured
            .as_ref()
            .and_then(|v| v["answer"].as_str())
            .map(|s| s.to_string());
        let verdict = evaluator::evaluate(
            &EvaluatorInput {
                hits: &retrieval_outcome.hits,
                answer: structured_answer.as_deref(),
                citations: &generation_outcome.citations,
            },
            &evaluator_cfg,
        );
        let evaluation_record = EvaluationRecord {
            id: Uuid::new_v4(),
            message_id,
            retrieval_record_id: retrieval_outcome.record.id,
            generation_record_id: Some(generation_outcome.record.id),
            status: verdict.status,
            rule_version: verdict.rule_version.to_string(),
            config: serde_json::to_value(&evaluator_cfg).unwrap_or(serde_json::Value::Null),
            checks: verdict.checks.clone(),
            scores: verdict.scores.clone(),
            meta: context_meta(&req.context),
            created_at: Utc::now(),
        };
        self.store.insert_evaluation_record(&evaluation_record)?;

        // 5. Verdict → message status → envelope.
        let model_call_failed = generation_outcome
            .gate
            .checks
            .iter()
            .any(|c| c.name == "model_call" && c.status == CheckStatus::Fail);
        let answer_visible = downstream_permitted(Stage::Evaluation, verdict.status);
        message.status = if model_call_failed {
            MessageStatus::Failed
        } else if answer_visible {
            MessageStatus::Success
        } else {
            MessageStatus::Blocked
        };
        if answer_visible && !model_call_failed {
            message.answer = structured_answer.clone();
        }
        message.updated_at = Utc::now();
        self.store.update_message(&message)?;

        let warnings: Vec<String> = verdict
            .checks
            .iter()
            .filter(|c| matches!(c.status, CheckStatus::Warn | CheckStatus::Fail))
            .map(|c| match &c.detail {
                Some(detail) => format!("{}: {detail}", c.name),
                None => c.name.clone(),
            })
            .collect();
        let mut reasons: Vec<String> = Vec::new();
        if model_call_failed || !answer_visible {
            reasons.extend(generation_outcome.gate.reasons.clone());
            reasons.extend(warnings.clone());
            if let Some(error) = &generation_outcome.record.error_message {
                if !reasons.iter().any(|r| r.contains(error)) {
                    reasons.push(error.clone());
                }
            }
        }

        info!(
            message_id = %message_id,
            status = ?message.status,
            evaluator = %verdict.status,
            citations = generation_outcome.citations.len(),
            "chat_turn_complete"
        );

        Ok(ChatReply {
            conversation_id,
            message_id,
            kb_id: kb.id,
            answer: message.answer.clone(),
            status: message.status,
            refusal: if message.answer.is_none() {
                Some(REFUSAL.to_string())
            } else {
                None
            },
            reasons,
            citations: generation_outcome.citations.clone(),
            evaluator: EvaluatorSummary {
                status: verdict.status,
                rule_version: verdict.rule_version.to_string(),
                warnings,
            },
            records: RecordIds {
                retrieval_record_id: Some(retrieval_outcome.record.id),
                generation_record_id: Some(generation_outcome.record.id),
                evaluation_record_id: Some(evaluation_record.id),
            },
            debug: self.debug_payload(&req, &retrieval_outcome),
        })
    }

    /// Retrieval gate failed: generation never runs, and an evaluation
    /// record with status `fail` documents why the chain stopped.
    #[allow(clippy::too_many_arguments)]
    fn block_on_retrieval(
        &self,
        req: ChatRequest,
        kb_id: Uuid,
        conversation_id: Uuid,
        mut message: Message,
        retrieval_outcome: retrieval::RetrievalOutcome,
        evaluator_cfg: &EvaluatorConfig,
        mut records: RecordIds,
    ) -> Result<ChatReply, CoreError> {
        let reasons = if retrieval_outcome.gate.reasons.is_empty() {
            vec!["no_evidence".to_string()]
        } else {
            retrieval_outcome.gate.reasons.clone()
        };

        let evaluation_record = EvaluationRecord {
            id: Uuid::new_v4(),
            message_id: message.id,
            retrieval_record_id: retrieval_outcome.record.id,
            generation_record_id: None,
            status: GateStatus::Fail,
            rule_version: RULE_VERSION.to_string(),
            config: serde_json::to_value(evaluator_cfg).unwrap_or(serde_json::Value::Null),
            checks: retrieval_outcome.gate.checks.clone(),
            scores: serde_json::json!({}),
            meta: {
                let mut meta = context_meta(&req.context);
                meta["blocked_by"] = serde_json::json!("retrieval");
                meta
            },
            created_at: Utc::now(),
        };
        self.store.insert_evaluation_record(&evaluation_record)?;
        records.evaluation_record_id = Some(evaluation_record.id);

        message.status = MessageStatus::Blocked;
        message.updated_at = Utc::now();
        self.store.update_message(&message)?;
        info!(message_id = %message.id, reasons = ?reasons, "chat blocked at retrieval gate");

        Ok(ChatReply {
            conversation_id,
            message_id: message.id,
            kb_id,
            answer: None,
            status: MessageStatus::Blocked,
            refusal: Some(REFUSAL.to_string()),
            reasons,
            citations: Vec::new(),
            evaluator: EvaluatorSummary {
                status: GateStatus::Fail,
                rule_version: RULE_VERSION.to_string(),
                warnings: retrieval_outcome.gate.reasons.clone(),
            },
            records,
            debug: self.debug_payload(&req, &retrieval_outcome),
        })
    }

    fn debug_payload(
        &self,
        req: &ChatRequest,
        retrieval_outcome: &retrieval::RetrievalOutcome,
    ) -> Option<ChatDebug> {
        if !req.debug {
            return None;
        }
        let include_hits = req.context.return_hits.unwrap_or(true);
        Some(ChatDebug {
            hits: if include_hits {
                retrieval_outcome.hits.clone()
            } else {
                Vec::new()
            },
            provider_snapshot: retrieval_outcome.record.provider_snapshot.clone(),
            timing_ms: retrieval_outcome.record.timing_ms,
        })
    }

    fn resolve_conversation(
        &self,
        req: &ChatRequest,
        kb: &KnowledgeBase,
    ) -> Result<Uuid, CoreError> {
        match req.conversation_id {
            Some(id) => {
                self.store
                    .get_conversation(id)?
                    .ok_or_else(|| CoreError::NotFound(format!("conversation {id}")))?;
                Ok(id)
            }
            None => {
                let conversation = Conversation {
                    id: Uuid::new_v4(),
                    kb_id: kb.id,
                    title: Some(retrieval::excerpt_of(&req.query)),
                    created_at: Utc::now(),
                };
                self.store.insert_conversation(&conversation)?;
                Ok(conversation.id)
            }
        }
    }

    fn resolve_options(&self, req: &ChatRequest) -> Result<RetrievalOptions, CoreError> {
        let mut options = self.config.retrieval.clone();
        if let Some(k) = req.context.keyword_top_k {
            options.keyword_top_k = k;
        }
        if let Some(k) = req.context.vector_top_k {
            options.vector_top_k = k;
        }
        if let Some(k) = req.context.fusion_top_k {
            options.fusion_top_k = k;
        }
        if let Some(k) = req.context.rerank_top_k {
            options.rerank_top_k = k;
        }
        if let Some(strategy) = &req.context.fusion_strategy {
            options.fusion_strategy = parse_enum::<FusionStrategy>("fusion_strategy", strategy)?;
        }
        if let Some(strategy) = &req.context.rerank_strategy {
            options.rerank_strategy = parse_enum::<RerankStrategy>("rerank_strategy", strategy)?;
        }
        // Intermediate-stage hits are persisted only for debug requests.
        options.persist_intermediate = req.debug && req.context.return_hits.unwrap_or(true);
        options
            .validate()
            .map_err(CoreError::BadRequest)?;
        Ok(options)
    }

    /// Query-time embedding config must match the KB's ingest-time config
    /// unless the context overrides it explicitly.
    fn resolve_embedder(
        &self,
        kb: &KnowledgeBase,
        context: &ChatContext,
    ) -> Result<Arc<dyn providers::EmbedProvider>, CoreError> {
        if let Some(name) = &context.embed_provider {
            let embedder = self.registry.embedder(name)?;
            if let Some(dim) = context.embed_dim {
                if dim != embedder.dim() {
                    return Err(CoreError::BadRequest(format!(
                        "embed_dim override {dim} does not match provider '{name}' dimension {}",
                        embedder.dim()
                    )));
                }
            }
            if let Some(model) = &context.embed_model {
                if model != embedder.model() {
                    return Err(CoreError::BadRequest(format!(
                        "embed_model '{model}' is not served by provider '{name}'"
                    )));
                }
            }
            return Ok(embedder);
        }
        let embedder = self.registry.embedder(&kb.embed_provider)?;
        if embedder.dim() != kb.embed_dim {
            return Err(CoreError::BadRequest(format!(
                "query-time embedding dimension {} differs from KB ingest-time dimension {}; \
                 pass an explicit embed_provider override to proceed",
                embedder.dim(),
                kb.embed_dim
            )));
        }
        Ok(embedder)
    }

    fn resolve_evaluator_config(&self, context: &ChatContext) -> Result<EvaluatorConfig, CoreError> {
        let Some(overrides) = &context.evaluator_config else {
            return Ok(self.config.evaluator.clone());
        };
        let mut base = serde_json::to_value(&self.config.evaluator)
            .map_err(|e| CoreError::Pipeline(e.to_string()))?;
        let serde_json::Value::Object(overrides) = overrides else {
            return Err(CoreError::BadRequest("evaluator_config must be an object".into()));
        };
        if let serde_json::Value::Object(base_map) = &mut base {
            for (key, value) in overrides {
                base_map.insert(key.clone(), value.clone());
            }
        }
        serde_json::from_value(base)
            .map_err(|e| CoreError::BadRequest(format!("invalid evaluator_config: {e}")))
    }
}

fn parse_enum<T: serde::de::DeserializeOwned>(field: &str, value: &str) -> Result<T, CoreError> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| CoreError::BadRequest(format!("invalid {field}: '{value}'")))
}

fn context_meta(context: &ChatContext) -> serde_json::Value {
    if context.extra.is_empty() {
        serde_json::json!({})
    } else {
        serde_json::json!({ "context_extra": context.extra })
    }
}
