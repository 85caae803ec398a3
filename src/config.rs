//! Application configuration and the provider allowlist registry.
//!
//! Configuration layers a `lexrag.toml` file (optional) under environment
//! variables prefixed `LEXRAG__`. The defaults run the whole pipeline
//! offline on the deterministic stub providers, which is what the tests and
//! local development use.

use evaluator::EvaluatorConfig;
use providers::{
    ApiChat, ApiEmbedder, ApiReranker, ChatProvider, EmbedProvider, RerankProvider, StubChat,
    StubEmbedder, StubReranker,
};
use retrieval::RetrievalOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding both redb files and raw document uploads.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_kb_name")]
    pub default_kb: String,
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Per-stage retrieval defaults; `ChatContext` overrides per request.
    #[serde(default)]
    pub retrieval: RetrievalOptions,
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    #[serde(default = "default_chat_provider")]
    pub default_chat_provider: String,
    #[serde(default = "default_prompt_name")]
    pub prompt_name: String,
    #[serde(default = "default_prompt_version")]
    pub prompt_version: String,
}

fn default_data_dir() -> String {
    "./data".into()
}

fn default_kb_name() -> String {
    "default".into()
}

fn default_chat_provider() -> String {
    "mock".into()
}

fn default_prompt_name() -> String {
    generation::DEFAULT_PROMPT_NAME.into()
}

fn default_prompt_version() -> String {
    generation::DEFAULT_PROMPT_VERSION.into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_kb: default_kb_name(),
            providers: ProvidersConfig::default(),
            retrieval: RetrievalOptions::default(),
            evaluator: EvaluatorConfig::default(),
            default_chat_provider: default_chat_provider(),
            prompt_name: default_prompt_name(),
            prompt_version: default_prompt_version(),
        }
    }
}

impl AppConfig {
    /// Load from `lexrag.toml` (if present) and `LEXRAG__*` environment
    /// variables.
    pub fn load() -> Result<Self, CoreError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("lexrag").required(false))
            .add_source(config::Environment::with_prefix("LEXRAG").separator("__"));
        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CoreError::BadRequest(format!("configuration error: {e}")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Stub,
    Api,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_embed_dim")]
    pub dim: usize,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_embed_dim() -> usize {
    384
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub embed: Vec<EmbedProviderConfig>,
    #[serde(default)]
    pub chat: Vec<ChatProviderConfig>,
    #[serde(default)]
    pub rerank: Vec<RerankProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            embed: vec![EmbedProviderConfig {
                name: "stub".into(),
                kind: ProviderKind::Stub,
                model: None,
                dim: default_embed_dim(),
                base_url: None,
                api_key: None,
            }],
            chat: vec![ChatProviderConfig {
                name: "mock".into(),
                kind: ProviderKind::Stub,
                model: None,
                base_url: None,
                api_key: None,
            }],
            rerank: vec![RerankProviderConfig {
                name: "stub".into(),
                kind: ProviderKind::Stub,
                model: None,
                base_url: None,
                api_key: None,
            }],
        }
    }
}

/// Instantiated providers, keyed by name. Only names present here may be
/// selected through `ChatContext`; everything else is a BadRequest.
pub struct ProviderRegistry {
    embedders: HashMap<String, Arc<dyn EmbedProvider>>,
    chats: HashMap<String, Arc<dyn ChatProvider>>,
    rerankers: HashMap<String, Arc<dyn RerankProvider>>,
}

impl ProviderRegistry {
    pub fn from_config(cfg: &ProvidersConfig) -> Result<Self, CoreError> {
        let mut embedders: HashMap<String, Arc<dyn EmbedProvider>> = HashMap::new();
        for provider in &cfg.embed {
            let instance: Arc<dyn EmbedProvider> = match provider.kind {
                ProviderKind::Stub => {
                    let mut stub = StubEmbedder::new(provider.dim);
                    if let Some(model) = &provider.model {
                        stub = stub.with_model_name(model.clone());
                    }
                    Arc::new(stub)
                }
                ProviderKind::Api => {
                    let base_url = provider.base_url.clone().ok_or_else(|| {
                        CoreError::BadRequest(format!(
                            "embed provider '{}' needs a base_url",
                            provider.name
                        ))
                    })?;
                    Arc::new(ApiEmbedder::new(
                        provider.name.clone(),
                        base_url,
                        provider.api_key.clone(),
                        provider.model.clone().unwrap_or_else(|| "text-embedding-3-small".into()),
                        provider.dim,
                    ))
                }
            };
            embedders.insert(provider.name.clone(), instance);
        }

        let mut chats: HashMap<String, Arc<dyn ChatProvider>> = HashMap::new();
        for provider in &cfg.chat {
            let instance: Arc<dyn ChatProvider> = match provider.kind {
                ProviderKind::Stub => Arc::new(StubChat::new()),
                ProviderKind::Api => {
                    let base_url = provider.base_url.clone().ok_or_else(|| {
                        CoreError::BadRequest(format!(
                            "chat provider '{}' needs a base_url",
                            provider.name
                        ))
                    })?;
                    Arc::new(ApiChat::new(
                        provider.name.clone(),
                        base_url,
                        provider.api_key.clone(),
                        provider.model.clone().unwrap_or_else(|| "gpt-4o-mini".into()),
                    ))
                }
            };
            chats.insert(provider.name.clone(), instance);
        }

        let mut rerankers: HashMap<String, Arc<dyn RerankProvider>> = HashMap::new();
        for provider in &cfg.rerank {
            let instance: Arc<dyn RerankProvider> = match provider.kind {
                ProviderKind::Stub => Arc::new(StubReranker::new()),
                ProviderKind::Api => {
                    let base_url = provider.base_url.clone().ok_or_else(|| {
                        CoreError::BadRequest(format!(
                            "rerank provider '{}' needs a base_url",
                            provider.name
                        ))
                    })?;
                    Arc::new(ApiReranker::new(
                        provider.name.clone(),
                        base_url,
                        provider.api_key.clone(),
                        provider.model.clone().unwrap_or_else(|| "rerank-english-v3.0".into()),
                    ))
                }
            };
            rerankers.insert(provider.name.clone(), instance);
        }

        Ok(Self {
            embedders,
            chats,
            rerankers,
        })
    }

    /// Register an embedding provider instance under a name. Used by
    /// embedders of the library and by tests injecting scripted providers.
    pub fn register_embedder(&mut self, name: impl Into<String>, provider: Arc<dyn EmbedProvider>) {
        self.embedders.insert(name.into(), provider);
    }

    pub fn register_chat(&mut self, name: impl Into<String>, provider: Arc<dyn ChatProvider>) {
        self.chats.insert(name.into(), provider);
    }

    pub fn register_reranker(&mut self, name: impl Into<String>, provider: Arc<dyn RerankProvider>) {
        self.rerankers.insert(name.into(), provider);
    }

    pub fn embedder(&self, name: &str) -> Result<Arc<dyn EmbedProvider>, CoreError> {
        self.embedders.get(name).cloned().ok_or_else(|| {
            CoreError::BadRequest(format!("embed provider '{name}' is not in the allowlist"))
        })
    }

    pub fn chat(&self, name: &str) -> Result<Arc<dyn ChatProvider>, CoreError> {
        self.chats.get(name).cloned().ok_or_else(|| {
            CoreError::BadRequest(format!("chat provider '{name}' is not in the allowlist"))
        })
    }

    pub fn reranker(&self, name: &str) -> Result<Arc<dyn RerankProvider>, CoreError> {
        self.rerankers.get(name).cloned().ok_or_else(|| {
            CoreError::BadRequest(format!("rerank provider '{name}' is not in the allowlist"))
        })
    }

    /// Any configured reranker, used when a request asks for cross-encoder
    /// rerank without naming one.
    pub fn default_reranker(&self) -> Option<Arc<dyn RerankProvider>> {
        self.rerankers.values().next().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_offline_and_valid() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.default_chat_provider, "mock");
        let registry = ProviderRegistry::from_config(&cfg.providers).unwrap();
        assert!(registry.embedder("stub").is_ok());
        assert!(registry.chat("mock").is_ok());
        assert!(registry.reranker("stub").is_ok());
    }

    #[test]
    fn unknown_provider_is_bad_request() {
        let registry = ProviderRegistry::from_config(&ProvidersConfig::default()).unwrap();
        assert!(matches!(
            registry.chat("shadow-llm"),
            Err(CoreError::BadRequest(_))
        ));
    }

    #[test]
    fn api_provider_without_base_url_rejected() {
        let cfg = ProvidersConfig {
            embed: vec![EmbedProviderConfig {
                name: "hosted".into(),
                kind: ProviderKind::Api,
                model: Some("m".into()),
                dim: 1536,
                base_url: None,
                api_key: None,
            }],
            chat: Vec::new(),
            rerank: Vec::new(),
        };
        assert!(matches!(
            ProviderRegistry::from_config(&cfg),
            Err(CoreError::BadRequest(_))
        ));
    }
}
