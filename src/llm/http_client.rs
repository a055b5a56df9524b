// src/llm/http_client.rs
// HTTP transport for LLM calls with retry on transient failures

use std::time::Duration;

use reqwest::Client;
use tracing::warn;

use crate::error::{AgentError, Result};

/// Maximum retry attempts for transient failures
const MAX_ATTEMPTS: u32 = 2;
/// Base backoff between retries, doubles each attempt
const BASE_BACKOFF_MS: u64 = 500;

/// Shared HTTP transport for the OpenAI-compatible endpoints
pub struct LlmHttpClient {
    client: Client,
    max_attempts: u32,
    base_backoff: Duration,
}

impl LlmHttpClient {
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            max_attempts: MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// POST a JSON body, retrying 429s and 5xx responses with backoff.
    /// Returns the response body as text on success.
    pub async fn post_with_retry(
        &self,
        request_id: &str,
        stage: &'static str,
        url: &str,
        api_key: &str,
        body: String,
    ) -> Result<String> {
        let mut attempts = 0;
        let mut backoff = self.base_backoff;

        loop {
            let response_result = self
                .client
                .post(url)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send()
                .await;

            match response_result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.text().await.map_err(AgentError::from);
                    }

                    let error_body = response.text().await.unwrap_or_default();
                    let transient = status.as_u16() == 429 || status.is_server_error();

                    if transient && attempts < self.max_attempts {
                        warn!(
                            request_id,
                            status = %status,
                            "Transient API error, retrying in {:?}",
                            backoff
                        );
                        tokio::time::sleep(backoff).await;
                        attempts += 1;
                        backoff *= 2;
                        continue;
                    }

                    let message = format!("API error {status}: {error_body}");
                    return Err(if transient {
                        AgentError::TransientUpstream { stage, message }
                    } else {
                        AgentError::PermanentUpstream { stage, message }
                    });
                }
                Err(e) => {
                    if attempts < self.max_attempts {
                        warn!(request_id, error = %e, "Request failed, retrying in {:?}", backoff);
                        tokio::time::sleep(backoff).await;
                        attempts += 1;
                        backoff *= 2;
                        continue;
                    }
                    return Err(AgentError::TransientUpstream {
                        stage,
                        message: format!("request failed after retries: {e}"),
                    });
                }
            }
        }
    }
}
