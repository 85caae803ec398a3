//! OpenAI-compatible HTTP providers.
//!
//! All three capabilities share one process-wide pooled client with explicit
//! timeouts. Requests are single-shot: a transport failure or non-success
//! status becomes [`ProviderError::Http`] and is recorded by the caller,
//! never retried here.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::{
    ChatMessage, ChatOptions, ChatOutput, ChatProvider, EmbedProvider, ProviderError,
    RerankProvider, TokenUsage,
};

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(16)
        .build()
        .expect("failed to build HTTP client")
});

async fn post_json(
    url: &str,
    api_key: Option<&str>,
    payload: &Value,
) -> Result<Value, ProviderError> {
    let mut request = HTTP_CLIENT.post(url).header("Content-Type", "application/json");
    if let Some(key) = api_key {
        request = request.header("Authorization", format!("Bearer {key}"));
    }

    let response = request
        .json(payload)
        .send()
        .await
        .map_err(|e| ProviderError::Http(format!("request to {url} failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Http(format!("HTTP {status} from {url}: {body}")));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| ProviderError::UnexpectedResponse(format!("invalid JSON body: {e}")))
}

/// Embedding client for `/v1/embeddings`-shaped endpoints.
pub struct ApiEmbedder {
    label: String,
    base_url: String,
    api_key: Option<String>,
    model_name: String,
    dim: usize,
}

impl ApiEmbedder {
    pub fn new(
        label: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dim: usize,
    ) -> Self {
        Self {
            label: label.into(),
            base_url: base_url.into(),
            api_key,
            model_name: model.into(),
            dim,
        }
    }
}

#[async_trait]
impl EmbedProvider for ApiEmbedder {
    fn name(&self) -> &str {
        &self.label
    }

    fn model(&self) -> &str {
        &self.model_name
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let payload = json!({ "model": self.model_name, "input": texts });
        let response = post_json(&url, self.api_key.as_deref(), &payload).await?;

        let vectors = parse_embedding_data(&response)?;
        if vectors.len() != texts.len() {
            return Err(ProviderError::UnexpectedResponse(format!(
                "{} embeddings returned for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        for vector in &vectors {
            if vector.len() != self.dim {
                return Err(ProviderError::UnexpectedResponse(format!(
                    "embedding dimension {} does not match configured {}",
                    vector.len(),
                    self.dim
                )));
            }
        }
        debug!(provider = %self.label, count = vectors.len(), "embeddings fetched");
        Ok(vectors)
    }
}

/// Chat client for `/v1/chat/completions`-shaped endpoints.
pub struct ApiChat {
    label: String,
    base_url: String,
    api_key: Option<String>,
    model_name: String,
}

impl ApiChat {
    pub fn new(
        label: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            base_url: base_url.into(),
            api_key,
            model_name: model.into(),
        }
    }
}

#[async_trait]
impl ChatProvider for ApiChat {
    fn name(&self) -> &str {
        &self.label
    }

    fn model(&self) -> &str {
        &self.model_name
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatOutput, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let payload = build_chat_payload(&self.model_name, messages, options);
        let response = post_json(&url, self.api_key.as_deref(), &payload).await?;

        let raw_text = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ProviderError::UnexpectedResponse("missing choices[0].message.content".into())
            })?
            .to_string();

        Ok(ChatOutput {
            raw_text,
            provider: self.label.clone(),
            model: self.model_name.clone(),
            usage: parse_usage(&response),
        })
    }
}

/// Rerank client for `/v1/rerank`-shaped endpoints (Cohere/voyage style).
pub struct ApiReranker {
    label: String,
    base_url: String,
    api_key: Option<String>,
    model_name: String,
}

impl ApiReranker {
    pub fn new(
        label: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            base_url: base_url.into(),
            api_key,
            model_name: model.into(),
        }
    }
}

#[async_trait]
impl RerankProvider for ApiReranker {
    fn name(&self) -> &str {
        &self.label
    }

    fn model(&self) -> &str {
        &self.model_name
    }

    async fn rerank(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, ProviderError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/rerank", self.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model_name,
            "query": query,
            "documents": passages,
        });
        let response = post_json(&url, self.api_key.as_deref(), &payload).await?;
        parse_rerank_scores(&response, passages.len())
    }
}

fn build_chat_payload(model: &str, messages: &[ChatMessage], options: &ChatOptions) -> Value {
    let mut payload = json!({
        "model": model,
        "messages": messages,
        "temperature": options.temperature,
    });
    if let Some(max_tokens) = options.max_tokens {
        payload["max_tokens"] = json!(max_tokens);
    }
    payload
}

fn parse_embedding_data(response: &Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = response["data"].as_array().ok_or_else(|| {
        ProviderError::UnexpectedResponse("embeddings response missing `data` array".into())
    })?;
    let mut vectors = Vec::with_capacity(data.len());
    for item in data {
        let values = item["embedding"].as_array().ok_or_else(|| {
            ProviderError::UnexpectedResponse("data item missing `embedding` array".into())
        })?;
        let mut vector = Vec::with_capacity(values.len());
        for value in values {
            let number = value.as_f64().ok_or_else(|| {
                ProviderError::UnexpectedResponse("embedding entries must be numbers".into())
            })?;
            vector.push(number as f32);
        }
        vectors.push(vector);
    }
    Ok(vectors)
}

fn parse_usage(response: &Value) -> Option<TokenUsage> {
    let usage = response.get("usage")?;
    Some(TokenUsage {
        prompt_tokens: usage["prompt_tokens"].as_u64()? as u32,
        completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
    })
}

fn parse_rerank_scores(response: &Value, expected: usize) -> Result<Vec<f32>, ProviderError> {
    let results = response["results"].as_array().ok_or_else(|| {
        ProviderError::UnexpectedResponse("rerank response missing `results` array".into())
    })?;
    let mut scores = vec![0f32; expected];
    for item in results {
        let index = item["index"].as_u64().ok_or_else(|| {
            ProviderError::UnexpectedResponse("rerank result missing `index`".into())
        })? as usize;
        let score = item["relevance_score"].as_f64().ok_or_else(|| {
            ProviderError::UnexpectedResponse("rerank result missing `relevance_score`".into())
        })? as f32;
        if index >= expected {
            return Err(ProviderError::UnexpectedResponse(format!(
                "rerank index {index} out of range for {expected} passages"
            )));
        }
        scores[index] = score;
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatRole;

    #[test]
    fn chat_payload_includes_messages_and_knobs() {
        let messages = vec![
            ChatMessage::system("legal role"),
            ChatMessage::user("question"),
        ];
        let payload = build_chat_payload("gpt-x", &messages, &ChatOptions::default());
        assert_eq!(payload["model"], "gpt-x");
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][1]["content"], "question");
        assert!(payload["max_tokens"].is_number());
    }

    #[test]
    fn chat_payload_omits_absent_max_tokens() {
        let options = ChatOptions {
            temperature: 0.0,
            max_tokens: None,
        };
        let payload = build_chat_payload("m", &[ChatMessage::user("q")], &options);
        assert!(payload.get("max_tokens").is_none());
    }

    #[test]
    fn embedding_data_parses_openai_shape() {
        let response = json!({
            "data": [
                { "embedding": [0.1, 0.2] },
                { "embedding": [0.3, 0.4] },
            ]
        });
        let vectors = parse_embedding_data(&response).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], vec![0.3, 0.4]);
    }

    #[test]
    fn embedding_data_rejects_non_numeric() {
        let response = json!({ "data": [{ "embedding": ["x"] }] });
        assert!(matches!(
            parse_embedding_data(&response),
            Err(ProviderError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn rerank_scores_reordered_by_index() {
        let response = json!({
            "results": [
                { "index": 1, "relevance_score": 0.9 },
                { "index": 0, "relevance_score": 0.2 },
            ]
        });
        let scores = parse_rerank_scores(&response, 2).unwrap();
        assert_eq!(scores, vec![0.2, 0.9]);
    }

    #[test]
    fn rerank_out_of_range_index_rejected() {
        let response = json!({ "results": [{ "index": 5, "relevance_score": 0.9 }] });
        assert!(parse_rerank_scores(&response, 2).is_err());
    }

    #[test]
    fn usage_parsed_when_present() {
        let response = json!({ "usage": { "prompt_tokens": 10, "completion_tokens": 4 } });
        let usage = parse_usage(&response).unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 4);
        assert!(parse_usage(&json!({})).is_none());
    }

    #[test]
    fn message_roles_serialize_for_wire() {
        let message = ChatMessage {
            role: ChatRole::Assistant,
            content: "ok".into(),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "assistant");
    }
}
