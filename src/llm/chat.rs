// src/llm/chat.rs
// OpenAI-compatible chat completions client

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{Span, debug, info, instrument};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::llm::http_client::LlmHttpClient;
use crate::llm::types::{ChatMessage, ChatResult, Usage};

/// Trait for chat models - the seam that lets tests script responses
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send a chat completion request
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<ChatResult>;

    /// Model name for cost attribution and logging
    fn model_name(&self) -> String;

    /// Cheap reachability probe for the health surface
    async fn probe(&self) -> Result<()>;
}

/// OpenAI-compatible chat API client
pub struct OpenAiChatClient {
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    http: LlmHttpClient,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChatClient {
    pub fn new(
        http_client: reqwest::Client,
        api_key: String,
        base_url: String,
        model: String,
    ) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature: 0.3,
            http: LlmHttpClient::from_client(http_client),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    #[instrument(skip(self, messages), fields(request_id, model = %self.model, message_count = messages.len()))]
    async fn chat_inner(&self, messages: Vec<ChatMessage>) -> Result<ChatResult> {
        let request_id = Uuid::new_v4().to_string();
        let start = Instant::now();

        Span::current().record("request_id", request_id.as_str());

        let body = serde_json::to_string(&serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        }))?;
        debug!(request_id = %request_id, "Chat request prepared");

        let raw = self
            .http
            .post_with_retry(&request_id, "llm_chat", &self.completions_url(), &self.api_key, body)
            .await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let parsed: ApiResponse = serde_json::from_str(&raw)
            .map_err(|e| AgentError::Llm(format!("unparseable chat response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AgentError::Llm("chat response carried no content".into()))?;

        if let Some(usage) = parsed.usage {
            info!(
                request_id = %request_id,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                duration_ms,
                "Chat completed"
            );
        }

        Ok(ChatResult {
            request_id,
            content,
            usage: parsed.usage,
            duration_ms,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatClient {
    async fn chat(&self, messages: Vec<ChatMessage>) -> Result<ChatResult> {
        self.chat_inner(messages).await
    }

    fn model_name(&self) -> String {
        self.model.clone()
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
            Err(AgentError::Llm(format!(
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
    fn test_completions_url_strips_trailing_slash() {
        let client = OpenAiChatClient::new(
            reqwest::Client::new(),
            "key".into(),
            "https://api.openai.com/v1/".into(),
            "gpt-4o-mini".into(),
        );
        assert_eq!(
            client.completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_response_parsing_shape() {
        let raw = r#"{
            "choices": [{"message": {"role": "assistant", "content": "hello"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let parsed: ApiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hello"));
        assert_eq!(parsed.usage.map(|u| u.total_tokens), Some(15));
    }
}
