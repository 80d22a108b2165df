//! Configuration management for the consistency experiment
//!
//! Loads backend, experiment and execution settings from TOML. Every field has
//! a default, and `validate()` rejects invalid combinations before any query is
//! issued.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::problems::{Category, DEFAULT_TOLERANCE};
use crate::runner::retry::RetryPolicy;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub experiment: ExperimentConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Backend-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub default_model: String,
    /// Requests per minute
    #[serde(default = "default_rpm")]
    pub rpm: u32,
    /// Tokens per minute
    #[serde(default = "default_tpm")]
    pub tpm: u32,
    /// Override for OpenAI-compatible or proxied endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// A model under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub provider: String,
}

/// What to ask and how often
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "default_models")]
    pub models: Vec<ModelSpec>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Per-category count when `categories` is empty
    #[serde(default = "default_num_problems")]
    pub num_problems: usize,
    /// Category name to problem count
    #[serde(default)]
    pub categories: BTreeMap<String, usize>,
    /// Category name to absolute epsilon
    #[serde(default)]
    pub tolerance: BTreeMap<String, f64>,
    #[serde(default = "default_answer_instruction")]
    pub answer_instruction: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// Query execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_parallel_requests")]
    pub parallel_requests: usize,
    /// Total attempts per triple, including the first
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Minimum spacing between requests to one backend
    #[serde(default = "default_rate_limit_interval_ms")]
    pub rate_limit_interval_ms: u64,
}

/// Output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_corpus_file")]
    pub corpus_file: String,
    #[serde(default = "default_response_log")]
    pub response_log: String,
}

// Default value functions
fn default_true() -> bool { true }
fn default_rpm() -> u32 { 60 }
fn default_tpm() -> u32 { 100_000 }
fn default_repetitions() -> u32 { 3 }
fn default_seed() -> u64 { 42 }
fn default_num_problems() -> usize { 10 }
fn default_answer_instruction() -> String { "請直接給出數值答案。".to_string() }
fn default_max_tokens() -> u32 { 1024 }
fn default_parallel_requests() -> usize { 4 }
fn default_retry_ceiling() -> u32 { 5 }
fn default_retry_delay_ms() -> u64 { 1000 }
fn default_max_retry_delay_ms() -> u64 { 60_000 }
fn default_timeout_ms() -> u64 { 120_000 }
fn default_rate_limit_interval_ms() -> u64 { 500 }
fn default_output_dir() -> String { "results".to_string() }
fn default_corpus_file() -> String { "data/questions.json".to_string() }
fn default_response_log() -> String { "results/responses.jsonl".to_string() }

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    let mut providers = BTreeMap::new();
    providers.insert(
        "anthropic".to_string(),
        ProviderConfig {
            enabled: true,
            default_model: "claude-sonnet-4-5".to_string(),
            rpm: 50,
            tpm: 100_000,
            base_url: None,
        },
    );
    providers.insert(
        "openai".to_string(),
        ProviderConfig {
            enabled: true,
            default_model: "gpt-4o".to_string(),
            rpm: 500,
            tpm: 200_000,
            base_url: None,
        },
    );
    providers
}

fn default_models() -> Vec<ModelSpec> {
    vec![
        ModelSpec {
            id: "gpt-4o".to_string(),
            provider: "openai".to_string(),
        },
        ModelSpec {
            id: "claude-sonnet-4-5".to_string(),
            provider: "anthropic".to_string(),
        },
    ]
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            temperature: 0.0,
            repetitions: default_repetitions(),
            seed: default_seed(),
            num_problems: default_num_problems(),
            categories: BTreeMap::new(),
            tolerance: BTreeMap::new(),
            answer_instruction: default_answer_instruction(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallel_requests: default_parallel_requests(),
            retry_ceiling: default_retry_ceiling(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            timeout_ms: default_timeout_ms(),
            rate_limit_interval_ms: default_rate_limit_interval_ms(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            corpus_file: default_corpus_file(),
            response_log: default_response_log(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            experiment: ExperimentConfig::default(),
            execution: ExecutionConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from default config location or return defaults
    pub fn load_or_default() -> Self {
        let config_paths = [
            "config/experiment.toml",
            "consistency-bench/config/experiment.toml",
        ];

        for path in &config_paths {
            if !Path::new(path).exists() {
                continue;
            }
            match Self::from_file(path) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", path);
                    return config;
                }
                Err(e) => tracing::warn!("Ignoring {}: {}", path, e),
            }
        }

        tracing::info!("Using default configuration");
        Self::default()
    }

    /// Save configuration to a TOML file
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Get a specific provider config
    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// Requested problem count per category, in canonical category order
    pub fn category_counts(&self) -> Result<Vec<(Category, usize)>, ConfigError> {
        if self.experiment.categories.is_empty() {
            return Ok(Category::all()
                .into_iter()
                .map(|c| (c, self.experiment.num_problems))
                .collect());
        }

        let mut counts = Vec::new();
        for (name, count) in &self.experiment.categories {
            let category: Category = name.parse().map_err(ConfigError::Invalid)?;
            counts.push((category, *count));
        }
        counts.sort_by_key(|(c, _)| *c);
        Ok(counts)
    }

    /// Tolerance overrides keyed by category
    pub fn tolerances(&self) -> Result<HashMap<Category, f64>, ConfigError> {
        let mut tolerances = HashMap::new();
        for (name, epsilon) in &self.experiment.tolerance {
            let category: Category = name.parse().map_err(ConfigError::Invalid)?;
            tolerances.insert(category, *epsilon);
        }
        Ok(tolerances)
    }

    /// Tolerance used for one category
    pub fn tolerance_for(&self, category: Category) -> f64 {
        self.experiment
            .tolerance
            .iter()
            .find(|(name, _)| name.parse::<Category>().ok() == Some(category))
            .map(|(_, epsilon)| *epsilon)
            .unwrap_or(DEFAULT_TOLERANCE)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.execution.retry_ceiling,
            initial_delay: Duration::from_millis(self.execution.retry_delay_ms),
            max_delay: Duration::from_millis(self.execution.max_retry_delay_ms),
        }
    }

    /// Reject invalid combinations before any query is issued
    pub fn validate(&self) -> Result<(), ConfigError> {
        let exp = &self.experiment;
        let exec = &self.execution;

        if exp.repetitions < 1 {
            return Err(ConfigError::Invalid("repetitions must be at least 1".into()));
        }
        if exp.models.is_empty() {
            return Err(ConfigError::Invalid("no models configured".into()));
        }
        for model in &exp.models {
            match self.providers.get(&model.provider) {
                Some(p) if p.enabled => {}
                Some(_) => {
                    return Err(ConfigError::Invalid(format!(
                        "model {} uses disabled provider {}",
                        model.id, model.provider
                    )))
                }
                None => {
                    return Err(ConfigError::Invalid(format!(
                        "model {} uses unknown provider {}",
                        model.id, model.provider
                    )))
                }
            }
        }
        let mut ids: Vec<&str> = exp.models.iter().map(|m| m.id.as_str()).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(ConfigError::Invalid("model ids must be unique".into()));
        }
        if !(0.0..=2.0).contains(&exp.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature {} outside [0, 2]",
                exp.temperature
            )));
        }
        if exec.retry_ceiling < 1 {
            return Err(ConfigError::Invalid("retry_ceiling must be at least 1".into()));
        }
        if exec.parallel_requests < 1 {
            return Err(ConfigError::Invalid("parallel_requests must be at least 1".into()));
        }
        if exec.retry_delay_ms > exec.max_retry_delay_ms {
            return Err(ConfigError::Invalid(
                "retry_delay_ms exceeds max_retry_delay_ms".into(),
            ));
        }
        for (category, epsilon) in self.tolerances()? {
            if !(epsilon.is_finite() && epsilon > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "tolerance for {} must be positive, got {}",
                    category, epsilon
                )));
            }
        }
        let total: usize = self.category_counts()?.iter().map(|(_, n)| n).sum();
        if total == 0 {
            return Err(ConfigError::Invalid("no problems requested".into()));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
