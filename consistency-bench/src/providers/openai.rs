//! OpenAI-compatible chat completions client

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

const DEFAULT_MODEL: &str = "gpt-4o";

/// OpenAI API client; also works against compatible servers via `with_base_url`
pub struct OpenAIClient {
    api_key: String,
    base_url: String,
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    default_model: String,
}

impl OpenAIClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            http_client: Client::new(),
            rate_limiter: Arc::new(RateLimiter::new(500, 200_000)),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create from environment variable
    pub fn from_env() -> ProviderResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::Config("OPENAI_API_KEY not set".to_string()))?;
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

    fn build_body(&self, request: &CompletionRequest) -> OpenAIRequest {
        let mut messages: Vec<OpenAIMessage> = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(OpenAIMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.extend(request.messages.iter().map(OpenAIMessage::from));

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        // Reasoning models reject temperature and the legacy max_tokens field
        let is_reasoning = model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4");
        let uses_completion_tokens = is_reasoning || model.starts_with("gpt-5");

        OpenAIRequest {
            model,
            messages,
            max_tokens: (!uses_completion_tokens).then_some(request.max_tokens),
            max_completion_tokens: uses_completion_tokens.then_some(request.max_tokens),
            temperature: if is_reasoning { None } else { request.temperature },
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

impl From<&Message> for OpenAIMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.clone(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<Choice>,
    model: String,
    usage: OpenAIUsage,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Deserialize)]
struct OpenAIErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

impl OpenAIErrorDetail {
    fn is_quota(&self) -> bool {
        self.error_type.as_deref() == Some("insufficient_quota")
            || self.message.contains("exceeded your current quota")
    }
}

#[async_trait]
impl LLMProvider for OpenAIClient {
    fn name(&self) -> &str {
        "openai"
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
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let latency_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        if status == 429 {
            let retry_after = retry_after_ms(response.headers());

            // 429 covers both throttling and an exhausted quota; only the former clears up
            let text = response.text().await.unwrap_or_default();
            if let Ok(error) = serde_json::from_str::<OpenAIError>(&text) {
                if error.error.is_quota() {
                    return Err(ProviderError::Config(format!(
                        "OpenAI quota exceeded: {}",
                        error.error.message
                    )));
                }
                tracing::debug!("Rate limited: {}", error.error.message);
            }

            return Err(ProviderError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<OpenAIError>(&text) {
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

        let api_response: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        self.rate_limiter
            .record_tokens(api_response.usage.prompt_tokens + api_response.usage.completion_tokens)
            .await;

        let choice = api_response
            .choices
            .first()
            .ok_or_else(|| ProviderError::Parse("No choices in response".to_string()))?;

        Ok(CompletionResponse {
            content: choice.message.content.clone().unwrap_or_default(),
            model: api_response.model,
            input_tokens: api_response.usage.prompt_tokens,
            output_tokens: api_response.usage.completion_tokens,
            finish_reason: choice
                .finish_reason
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
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
    fn test_body_for_chat_model() {
        let client = OpenAIClient::new("key".into());
        let request = CompletionRequest::new(vec![Message::user("計算 2 + 2")], 128)
            .with_system("請直接給出數值答案。")
            .with_temperature(0.0);

        let json = serde_json::to_value(client.build_body(&request)).unwrap();
        assert_eq!(json["model"], DEFAULT_MODEL);
        assert_eq!(json["max_tokens"], 128);
        assert!(json.get("max_completion_tokens").is_none());
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "計算 2 + 2");
    }

    #[test]
    fn test_body_for_reasoning_model_drops_temperature() {
        let client = OpenAIClient::new("key".into());
        let request = CompletionRequest::new(vec![Message::user("q")], 64)
            .with_model("o3-mini")
            .with_temperature(0.0);

        let json = serde_json::to_value(client.build_body(&request)).unwrap();
        assert!(json.get("temperature").is_none());
        assert_eq!(json["max_completion_tokens"], 64);
    }

    #[test]
    fn test_quota_detection() {
        let raw = r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota"}}"#;
        let error: OpenAIError = serde_json::from_str(raw).unwrap();
        assert!(error.error.is_quota());
    }
}
