//! Provider trait definitions for model backends

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::runner::rate_limiter::RateLimiter;

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Request for a completion from a model backend
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, max_tokens: u32) -> Self {
        Self {
            model: None,
            messages,
            max_tokens,
            temperature: None,
            system_prompt: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Text of the first user message
    pub fn prompt(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Response from a model backend
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: String,
    pub latency_ms: u64,
}

/// Error types for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// How the query client should react to a provider error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Worth retrying with backoff
    Transient,
    /// This request will never succeed; record it and move on
    Rejected,
    /// The whole backend is unusable; stop the batch
    BackendFatal,
}

impl ProviderError {
    pub fn class(&self) -> FailureClass {
        match self {
            ProviderError::Timeout { .. } | ProviderError::RateLimited { .. } => {
                FailureClass::Transient
            }
            ProviderError::Http(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
                    FailureClass::Transient
                } else {
                    match e.status().map(|s| s.as_u16()) {
                        Some(status) => status_class(status),
                        None => FailureClass::Transient,
                    }
                }
            }
            ProviderError::Api { status, .. } => status_class(*status),
            ProviderError::Auth(_) | ProviderError::Config(_) => FailureClass::BackendFatal,
            ProviderError::Parse(_) => FailureClass::Rejected,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    /// Server-requested wait, if any
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

fn status_class(status: u16) -> FailureClass {
    match status {
        408 | 429 | 500..=599 => FailureClass::Transient,
        401 | 403 => FailureClass::BackendFatal,
        _ => FailureClass::Rejected,
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Trait for model backends
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Get the provider name (e.g., "anthropic", "openai")
    fn name(&self) -> &str;

    /// Get the default model for this provider
    fn default_model(&self) -> &str;

    /// Send a completion request
    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse>;

    /// Get the rate limiter for this provider
    fn rate_limiter(&self) -> &Arc<RateLimiter>;
}
