//! Model backend implementations

pub mod anthropic;
pub mod openai;
pub mod traits;

pub use anthropic::AnthropicClient;
pub use openai::OpenAIClient;
pub use traits::{
    CompletionRequest, CompletionResponse, FailureClass, LLMProvider, Message, ProviderError,
    ProviderResult,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, ProviderConfig};

/// Model id to the backend that serves it
pub type Backends = HashMap<String, Arc<dyn LLMProvider>>;

/// `retry-after` header in milliseconds, one minute when absent
pub(crate) fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(60)
        * 1000
}

fn configure_anthropic(mut client: AnthropicClient, pc: &ProviderConfig, interval: Duration) -> AnthropicClient {
    client = client.with_rate_limits(pc.rpm, pc.tpm, interval);
    if !pc.default_model.is_empty() {
        client = client.with_model(&pc.default_model);
    }
    if let Some(url) = &pc.base_url {
        client = client.with_base_url(url);
    }
    client
}

fn configure_openai(mut client: OpenAIClient, pc: &ProviderConfig, interval: Duration) -> OpenAIClient {
    client = client.with_rate_limits(pc.rpm, pc.tpm, interval);
    if !pc.default_model.is_empty() {
        client = client.with_model(&pc.default_model);
    }
    if let Some(url) = &pc.base_url {
        client = client.with_base_url(url);
    }
    client
}

/// Create one backend by provider name, applying settings from config
///
/// Names other than `anthropic` are treated as OpenAI-compatible endpoints
/// when they carry a `base_url`.
pub fn create_provider(name: &str, config: &Config) -> ProviderResult<Arc<dyn LLMProvider>> {
    let pc = config
        .get_provider(name)
        .ok_or_else(|| ProviderError::Config(format!("Unknown provider: {}", name)))?;
    let interval = Duration::from_millis(config.execution.rate_limit_interval_ms);

    match name.to_lowercase().as_str() {
        "anthropic" | "claude" => Ok(Arc::new(configure_anthropic(
            AnthropicClient::from_env()?,
            pc,
            interval,
        ))),
        "openai" | "gpt" => Ok(Arc::new(configure_openai(
            OpenAIClient::from_env()?,
            pc,
            interval,
        ))),
        _ if pc.base_url.is_some() => {
            // local servers usually ignore the key
            let key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
            Ok(Arc::new(configure_openai(OpenAIClient::new(key), pc, interval)))
        }
        _ => Err(ProviderError::Config(format!(
            "Provider {} needs a base_url",
            name
        ))),
    }
}

/// Create the backends for every configured model
///
/// Models sharing a provider share one client, and so one rate limiter.
pub fn create_backends(config: &Config) -> ProviderResult<Backends> {
    let mut by_provider: HashMap<&str, Arc<dyn LLMProvider>> = HashMap::new();
    let mut backends = Backends::new();

    for model in &config.experiment.models {
        let provider = match by_provider.get(model.provider.as_str()) {
            Some(p) => Arc::clone(p),
            None => {
                let p = create_provider(&model.provider, config)?;
                by_provider.insert(model.provider.as_str(), Arc::clone(&p));
                p
            }
        };
        backends.insert(model.id.clone(), provider);
    }

    Ok(backends)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_ms(&headers), 60_000);
        headers.insert("retry-after", HeaderValue::from_static("7"));
        assert_eq!(retry_after_ms(&headers), 7_000);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = Config::default();
        assert!(matches!(
            create_provider("nowhere", &config),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn test_compatible_endpoint_shares_client() {
        let toml = r#"
[providers.local]
default_model = "qwen"
base_url = "http://localhost:8000/v1"

[experiment]
models = [{ id = "qwen-7b", provider = "local" }, { id = "qwen-14b", provider = "local" }]
"#;
        let config = Config::from_toml(toml).unwrap();
        let backends = create_backends(&config).unwrap();
        assert_eq!(backends.len(), 2);
        assert!(Arc::ptr_eq(&backends["qwen-7b"], &backends["qwen-14b"]));
        assert_eq!(backends["qwen-7b"].name(), "openai");
    }
}
