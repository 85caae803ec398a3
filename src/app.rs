//! Application assembly: stores, providers, and engines wired from config.

use chrono::Utc;
use ingest::{IngestEngine, IngestOutcome, IngestRequest};
use std::path::Path;
use std::sync::Arc;
use store::{ChunkingConfig, DocStore, KnowledgeBase};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;
use vector::VectorStore;

use crate::chat::{ChatEngine, ChatReply, ChatRequest};
use crate::config::{AppConfig, ProviderRegistry};
use crate::error::CoreError;

/// One process-wide instance of the trusted RAG core.
pub struct App {
    pub store: Arc<DocStore>,
    pub vectors: Arc<VectorStore>,
    pub registry: Arc<ProviderRegistry>,
    pub config: AppConfig,
    ingest: IngestEngine,
    chat: ChatEngine,
}

impl App {
    /// Open stores under `config.data_dir` and build the provider registry.
    pub fn open(config: AppConfig) -> Result<Self, CoreError> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| {
            CoreError::ExternalDependency(format!(
                "cannot create data dir '{}': {e}",
                config.data_dir
            ))
        })?;
        let data_dir = Path::new(&config.data_dir);
        let store = Arc::new(DocStore::open(data_dir.join("store.redb"))?);
        let vectors = Arc::new(VectorStore::open(data_dir.join("vectors.redb"))?);
        let registry = Arc::new(ProviderRegistry::from_config(&config.providers)?);

        let ingest = IngestEngine::new(store.clone(), vectors.clone());
        let chat = ChatEngine::new(
            store.clone(),
            vectors.clone(),
            registry.clone(),
            config.clone(),
        );
        info!(data_dir = %config.data_dir, "lexrag core ready");
        Ok(Self {
            store,
            vectors,
            registry,
            config,
            ingest,
            chat,
        })
    }

    /// Create a KB bound to one embedding configuration. The configuration
    /// is immutable once a file references it.
    pub fn create_kb(
        &self,
        name: &str,
        embed_provider: Option<&str>,
    ) -> Result<KnowledgeBase, CoreError> {
        if name.trim().is_empty() {
            return Err(CoreError::BadRequest("kb name must not be empty".into()));
        }
        let provider_name = embed_provider
            .map(|s| s.to_string())
            .or_else(|| self.config.providers.embed.first().map(|p| p.name.clone()))
            .unwrap_or_else(|| "stub".into());
        let embedder = self.registry.embedder(&provider_name)?;

        let kb = KnowledgeBase {
            id: Uuid::new_v4(),
            name: name.to_string(),
            collection: format!("{name}_vectors"),
            embed_provider: provider_name,
            embed_model: embedder.model().to_string(),
            embed_dim: embedder.dim(),
            chunking: ChunkingConfig::default(),
            created_at: Utc::now(),
        };
        self.store.create_kb(&kb)?;
        Ok(kb)
    }

    /// Resolve a KB by id or name.
    pub fn resolve_kb(&self, id_or_name: &str) -> Result<KnowledgeBase, CoreError> {
        if let Ok(id) = Uuid::parse_str(id_or_name) {
            if let Some(kb) = self.store.get_kb(id)? {
                return Ok(kb);
            }
        }
        self.store
            .get_kb_by_name(id_or_name)?
            .ok_or_else(|| CoreError::NotFound(format!("knowledge base '{id_or_name}'")))
    }

    /// Ingest one file with the KB's embedding provider.
    pub async fn ingest(
        &self,
        req: IngestRequest,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome, CoreError> {
        let kb = self
            .store
            .get_kb(req.kb_id)?
            .ok_or_else(|| CoreError::NotFound(format!("knowledge base {}", req.kb_id)))?;
        let embedder = self.registry.embedder(&kb.embed_provider)?;
        self.ingest
            .ingest_file(embedder.as_ref(), req, cancel)
            .await
            .map_err(Into::into)
    }

    /// One chat turn through retrieval → generation → evaluation.
    pub async fn chat(
        &self,
        req: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatReply, CoreError> {
        self.chat.chat(req, cancel).await
    }
}
