//! In-process scripted backend shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use consistency_bench::problems::{Problem, VariantKey};
use consistency_bench::providers::{
    Backends, CompletionRequest, CompletionResponse, LLMProvider, ProviderError, ProviderResult,
};
use consistency_bench::runner::{ExecutorConfig, RateLimiter, RetryPolicy};

pub const INSTRUCTION: &str = "請直接給出數值答案。";

/// How a scripted model answers one variant
#[derive(Clone)]
pub enum Reply {
    /// States the ground truth after an anchor
    Correct,
    /// Free text returned verbatim
    Text(String),
    /// Fails with HTTP 503 on the first call for this prompt, then answers correctly
    FlakyOnce,
    /// Always fails with the given status
    Status(u16),
}

/// Backend that answers from a prompt-to-reply table
pub struct ScriptedProvider {
    answers: HashMap<String, (Reply, String)>,
    seen: Mutex<HashMap<String, usize>>,
    pub calls: AtomicUsize,
    limiter: Arc<RateLimiter>,
}

impl ScriptedProvider {
    /// `reply` picks the behavior for each (problem, variant)
    pub fn new(problems: &[Problem], reply: impl Fn(&Problem, VariantKey) -> Reply) -> Self {
        let mut answers = HashMap::new();
        for problem in problems {
            for (variant, text) in problem.paraphrases.iter() {
                let prompt = format!("{}\n\n{}", text, INSTRUCTION);
                let truth = format!("答案是 {}", problem.ground_truth);
                answers.insert(prompt, (reply(problem, variant), truth));
            }
        }
        Self {
            answers,
            seen: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            limiter: Arc::new(RateLimiter::new(100_000, 0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-1"
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request.prompt().to_string();
        let (reply, truth) = self
            .answers
            .get(&prompt)
            .cloned()
            .ok_or_else(|| ProviderError::Parse(format!("unscripted prompt: {}", prompt)))?;

        let seen = {
            let mut seen = self.seen.lock().unwrap();
            let count = seen.entry(prompt).or_insert(0);
            *count += 1;
            *count
        };

        let content = match reply {
            Reply::Correct => truth,
            Reply::Text(text) => text,
            Reply::FlakyOnce if seen == 1 => {
                return Err(ProviderError::Api {
                    status: 503,
                    message: "overloaded".into(),
                })
            }
            Reply::FlakyOnce => truth,
            Reply::Status(status) => {
                return Err(ProviderError::Api {
                    status,
                    message: "scripted failure".into(),
                })
            }
        };

        Ok(CompletionResponse {
            content,
            model: "scripted-1".into(),
            input_tokens: 10,
            output_tokens: 5,
            finish_reason: "stop".into(),
            latency_ms: 1,
        })
    }

    fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

pub fn executor_config() -> ExecutorConfig {
    ExecutorConfig {
        parallel_requests: 4,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        timeout_ms: 5_000,
        temperature: 0.0,
        max_tokens: 64,
        answer_instruction: INSTRUCTION.to_string(),
    }
}

pub fn backends(entries: Vec<(&str, Arc<ScriptedProvider>)>) -> Backends {
    let mut backends = Backends::new();
    for (model, provider) in entries {
        backends.insert(model.to_string(), provider);
    }
    backends
}
