// src/embeddings.rs
// OpenAI-compatible embeddings API client

use async_trait::async_trait;
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::llm::LlmHttpClient;

/// Max characters to embed (longer text is truncated)
const MAX_TEXT_CHARS: usize = 8000;

/// Trait for embedders - the seam that lets tests supply canned vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text into a dense vector
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Model name for cost attribution
    fn model_name(&self) -> String;

    /// Embedding dimensions
    fn dimensions(&self) -> usize;

    /// Cheap reachability probe for the health surface
    async fn probe(&self) -> Result<()>;
}

/// Rough token estimate for embedding input: one token per four characters
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}

/// Embeddings client for OpenAI-compatible APIs
pub struct OpenAiEmbeddings {
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
    http: LlmHttpClient,
}

impl OpenAiEmbeddings {
    pub fn new(
        http_client: reqwest::Client,
        api_key: String,
        base_url: String,
        model: String,
        dimensions: usize,
    ) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dimensions,
            http: LlmHttpClient::from_client(http_client),
        }
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }

    async fn embed_inner(&self, text: &str) -> Result<Vec<f32>> {
        let text = if text.len() > MAX_TEXT_CHARS {
            debug!(
                original = text.len(),
                truncated = MAX_TEXT_CHARS,
                "Truncating embedding input"
            );
            let mut end = MAX_TEXT_CHARS;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        };

        let body = serde_json::to_string(&serde_json::json!({
            "model": self.model,
            "input": text,
        }))?;

        let request_id = uuid::Uuid::new_v4().to_string();
        let raw = self
            .http
            .post_with_retry(&request_id, "embedding", &self.embeddings_url(), &self.api_key, body)
            .await?;

        let json: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| AgentError::Embedding(format!("unparseable embedding response: {e}")))?;

        let vector: Vec<f32> = json["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| AgentError::Embedding("embedding response carried no vector".into()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        if vector.len() != self.dimensions {
            return Err(AgentError::Embedding(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                vector.len()
            )));
        }

        Ok(vector)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_inner(text).await
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn probe(&self) -> Result<()> {
        let response = self
            .http
            .inner()
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(AgentError::Embedding(format!(
                "models probe returned {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("how do I upload photos"), 5);
    }

    #[test]
    fn test_embeddings_url() {
        let client = OpenAiEmbeddings::new(
            reqwest::Client::new(),
            "key".into(),
            "https://api.openai.com/v1".into(),
            "text-embedding-3-small".into(),
            1536,
        );
        assert_eq!(client.embeddings_url(), "https://api.openai.com/v1/embeddings");
    }
}
