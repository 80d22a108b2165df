//! Anthropic Messages API client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::retry_after_ms;
use super::traits::{
    CompletionRequest, CompletionResponse, LLMProvider, Message, ProviderError, ProviderResult,
};
use crate::runner::rate_limiter::RateLimiter;

const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const API_VERSION: &str = "2023-06-01";

/// Anthropic API client
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    default_model: String,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.anthropic.com/v1".to_string(),
            http_client: Client::new(),
            rate_limiter: Arc::new(RateLimiter::new(60, 100_000)),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create from environment variable
    pub fn from_env() -> ProviderResult<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ProviderError::Config("ANTHROPIC_API_KEY not set".to_string()))?;
        Ok(Self::new(api_key))
    }

    /// Set custom base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set custom rate limits
    pub fn with_rate_limits(mut self, rpm: u32, tpm: u32, min_interval: Duration) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::new(rpm, tpm).with_min_interval(min_interval));
        self
    }

    /// Set default model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    fn build_body(&self, request: &CompletionRequest) -> AnthropicRequest {
        // Anthropic takes the system prompt as a top-level field
        let system = request.system_prompt.clone().or_else(|| {
            request
                .messages
                .iter()
                .find(|m| m.role == "system")
                .map(|m| m.content.clone())
        });

        AnthropicRequest {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            max_tokens: request.max_tokens,
            messages: request
                .messages
                .iter()
                .filter(|m| m.role != "system")
                .map(|m| m.into())
                .collect(),
            system,
            temperature: request.temperature,
        }
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

impl From<&Message> for AnthropicMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.clone(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct AnthropicError {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl LLMProvider for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        self.rate_limiter.acquire().await;
        self.rate_limiter
            .wait_for_token_capacity(request.max_tokens)
            .await;

        let start = Instant::now();
        let body = self.build_body(request);

        let response = self
            .http_client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let latency_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry_after_ms(response.headers()),
            });
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<AnthropicError>(&text) {
                Ok(error) => error.error.message,
                Err(_) => format!("HTTP {}: {}", status.as_u16(), text),
            };
            if status == 401 || status == 403 {
                return Err(ProviderError::Auth(message));
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let api_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        self.rate_limiter
            .record_tokens(api_response.usage.input_tokens + api_response.usage.output_tokens)
            .await;

        let content = api_response
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content,
            model: api_response.model,
            input_tokens: api_response.usage.input_tokens,
            output_tokens: api_response.usage.output_tokens,
            finish_reason: api_response.stop_reason.unwrap_or_else(|| "unknown".to_string()),
            latency_ms,
        })
    }

    fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_hoists_system_prompt() {
        let client = AnthropicClient::new("key".into()).with_model("claude-test");
        let request = CompletionRequest::new(
            vec![Message::system("請直接給出數值答案。"), Message::user("計算 2 + 2")],
            256,
        )
        .with_temperature(0.0);

        let json = serde_json::to_value(client.build_body(&request)).unwrap();
        assert_eq!(json["model"], "claude-test");
        assert_eq!(json["system"], "請直接給出數值答案。");
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_response_text_blocks_joined() {
        let raw = r#"{"content":[{"type":"text","text":"答案是 "},{"type":"text","text":"801"}],
            "model":"m","stop_reason":"end_turn","usage":{"input_tokens":5,"output_tokens":3}}"#;
        let parsed: AnthropicResponse = serde_json::from_str(raw).unwrap();
        let text: String = parsed
            .content
            .iter()
            .filter_map(|b| b.text.as_deref())
            .collect();
        assert_eq!(text, "答案是 801");
    }
}
