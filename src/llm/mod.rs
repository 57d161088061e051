//! LLM inference client.
//!
//! The life loop depends only on the [`LlmClient`] trait: one `infer`
//! operation taking a system prompt, a message list, and a tools array, and
//! returning content blocks plus usage. The production implementation speaks
//! the Anthropic Messages API over reqwest; tests script a mock.
//!
//! Retry policy: up to 3 attempts with exponential backoff (1, 2, 4 s) on
//! retryable statuses (429 and 5xx). Other 4xx errors fail immediately and
//! bubble up to the life loop's iteration boundary.

pub mod types;

pub use types::{collect_text, ContentBlock, InferResponse, Message, Role, ToolDefinition, Usage};

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::LlmError;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 8192;
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_secs(1);

/// The single operation the core consumes from the inference collaborator.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn infer(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Value],
    ) -> Result<InferResponse, LlmError>;
}

/// Anthropic Messages API client bound to one model.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
        }
    }

    async fn post_once(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Value],
    ) -> Result<reqwest::Response, LlmError> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": MAX_OUTPUT_TOKENS,
            "system": system,
            "messages": messages,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.to_vec());
        }

        let response = self
            .http
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .timeout(Duration::from_secs(300))
            .send()
            .await?;
        Ok(response)
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn infer(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Value],
    ) -> Result<InferResponse, LlmError> {
        let mut delay = RETRY_BASE;
        let mut last_failure = String::new();

        for attempt in 1..=RETRY_ATTEMPTS {
            let outcome = self.post_once(system, messages, tools).await;

            match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: InferResponse = response
                            .json()
                            .await
                            .map_err(|e| LlmError::BadResponse(e.to_string()))?;
                        return Ok(parsed);
                    }

                    let code = status.as_u16();
                    let body = response.text().await.unwrap_or_default();
                    let message = api_error_message(&body);

                    if !is_retryable(code) {
                        return Err(LlmError::Api {
                            status: code,
                            message,
                        });
                    }
                    last_failure = format!("HTTP {code}: {message}");
                }
                Err(LlmError::Http(e)) => {
                    // Network-level failures are retryable.
                    last_failure = e.to_string();
                }
                Err(other) => return Err(other),
            }

            if attempt < RETRY_ATTEMPTS {
                tracing::warn!(attempt, error = %last_failure, "inference failed, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: RETRY_ATTEMPTS,
            last: last_failure,
        })
    }
}

/// 429 and 5xx are retryable; any other 4xx is a hard failure.
fn is_retryable(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Pull the error message out of an API error body, falling back to the raw
/// body when it is not the documented shape.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")?
                .get("message")?
                .as_str()
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| body.chars().take(500).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_are_429_and_5xx() {
        assert!(is_retryable(429));
        assert!(is_retryable(500));
        assert!(is_retryable(529));
        assert!(!is_retryable(400));
        assert!(!is_retryable(401));
        assert!(!is_retryable(404));
    }

    #[test]
    fn api_error_message_extracts_documented_shape() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert_eq!(api_error_message(body), "Overloaded");
    }

    #[test]
    fn api_error_message_falls_back_to_raw_body() {
        assert_eq!(api_error_message("gateway timeout"), "gateway timeout");
    }
}
