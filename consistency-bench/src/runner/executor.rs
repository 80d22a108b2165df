//! Query client: single queries with retry, and a worker pool over triples

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::sleep;

use super::response_log::{completed_keys, LogError, QueryRequest, QueryResponse, ResponseLog, ResponseRecord};
use super::retry::{AttemptOutcome, QueryState, RetryPolicy};
use crate::config::Config;
use crate::problems::Problem;
use crate::providers::{
    Backends, CompletionRequest, CompletionResponse, FailureClass, LLMProvider, Message, ProviderError,
};

/// Configuration for the executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Concurrent outbound calls across all models
    pub parallel_requests: usize,
    pub retry: RetryPolicy,
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Appended to every prompt
    pub answer_instruction: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallel_requests: 4,
            retry: RetryPolicy::default(),
            timeout_ms: 120_000,
            temperature: 0.0,
            max_tokens: 1024,
            answer_instruction: String::new(),
        }
    }
}

impl ExecutorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            parallel_requests: config.execution.parallel_requests.max(1),
            retry: config.retry_policy(),
            timeout_ms: config.execution.timeout_ms,
            temperature: config.experiment.temperature,
            max_tokens: config.experiment.max_tokens,
            answer_instruction: config.experiment.answer_instruction.clone(),
        }
    }

    fn prompt(&self, variant_text: &str) -> String {
        if self.answer_instruction.is_empty() {
            variant_text.to_string()
        } else {
            format!("{}\n\n{}", variant_text, self.answer_instruction)
        }
    }
}

/// Counts reported at the end of a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Triples in the batch, including skipped ones
    pub total: usize,
    pub attempted: usize,
    /// Already complete in the response log
    pub skipped: usize,
    pub succeeded: usize,
    pub retried_then_succeeded: usize,
    pub failed: usize,
    /// Never started because the batch was cancelled or halted
    pub cancelled: usize,
}

impl RunSummary {
    fn merge(&mut self, other: &RunSummary) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.retried_then_succeeded += other.retried_then_succeeded;
        self.failed += other.failed;
    }
}

/// Error type for query execution
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("No backend configured for model {0}")]
    UnknownModel(String),

    #[error("Query {0} is already in flight")]
    DuplicateInFlight(QueryRequest),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("Backend for {model} unavailable: {message}")]
    BackendUnavailable {
        model: String,
        message: String,
        summary: RunSummary,
    },
}

/// Stops a running batch: no new triples start, in-flight ones finish
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

struct WorkItem {
    request: QueryRequest,
    text: String,
}

/// Why workers stopped pulling work early
#[derive(Default)]
struct Halt {
    flag: AtomicBool,
    reason: std::sync::Mutex<Option<(String, String)>>,
}

impl Halt {
    fn trip(&self, reason: Option<(String, String)>) {
        self.flag.store(true, Ordering::SeqCst);
        if let Some(reason) = reason {
            let mut slot = self.reason.lock().unwrap_or_else(|e| e.into_inner());
            slot.get_or_insert(reason);
        }
    }

    fn is_tripped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn take_reason(&self) -> Option<(String, String)> {
        self.reason.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Removes a request from the in-flight set when dropped
struct InFlightGuard {
    set: Arc<std::sync::Mutex<HashSet<QueryRequest>>>,
    key: QueryRequest,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.key);
    }
}

/// Process-scoped query context: backends, the response log and in-flight keys
#[derive(Clone)]
pub struct Executor {
    config: Arc<ExecutorConfig>,
    backends: Arc<Backends>,
    log: Arc<ResponseLog>,
    in_flight: Arc<std::sync::Mutex<HashSet<QueryRequest>>>,
    cancel: Arc<watch::Sender<bool>>,
}

impl Executor {
    /// Create a new executor
    pub fn new(backends: Backends, log: Arc<ResponseLog>, config: ExecutorConfig) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            backends: Arc::new(backends),
            log,
            in_flight: Arc::new(std::sync::Mutex::new(HashSet::new())),
            cancel: Arc::new(cancel),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel),
        }
    }

    /// Model ids with a backend, sorted
    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.backends.keys().cloned().collect();
        models.sort();
        models
    }

    fn claim(&self, request: &QueryRequest) -> Result<InFlightGuard, ExecutorError> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(request.clone()) {
            return Err(ExecutorError::DuplicateInFlight(request.clone()));
        }
        Ok(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            key: request.clone(),
        })
    }

    /// Query one triple, retrying transient failures, and persist the outcome
    ///
    /// The record is durable in the response log before this returns. A
    /// non-transient failure is returned as a failed response, not an error.
    pub async fn query(
        &self,
        request: &QueryRequest,
        variant_text: &str,
    ) -> Result<QueryResponse, ExecutorError> {
        let provider = self
            .backends
            .get(&request.model_id)
            .cloned()
            .ok_or_else(|| ExecutorError::UnknownModel(request.model_id.clone()))?;
        let _guard = self.claim(request)?;

        let prompt = self.config.prompt(variant_text);
        let policy = self.config.retry;
        let start = Instant::now();

        let mut state = QueryState::Pending;
        let mut last_error: Option<ProviderError> = None;
        let mut reply: Option<CompletionResponse> = None;

        while !state.is_terminal() {
            if let QueryState::Retrying { attempt, delay } = state {
                tracing::warn!(
                    "Retry {} for {} in {}ms: {}",
                    attempt,
                    request,
                    delay.as_millis(),
                    last_error.as_ref().map(|e| e.to_string()).unwrap_or_default()
                );
                sleep(delay).await;
            }

            match self.try_complete(&provider, &request.model_id, &prompt).await {
                Ok(response) => {
                    reply = Some(response);
                    state = state.next(AttemptOutcome::Success, &policy);
                }
                Err(e) => {
                    tracing::debug!("Attempt {} for {} failed: {}", state.attempts() + 1, request, e);
                    let outcome = AttemptOutcome::Failure {
                        class: e.class(),
                        retry_after: e.retry_after_ms().map(Duration::from_millis),
                    };
                    last_error = Some(e);
                    state = state.next(outcome, &policy);
                }
            }
        }

        let response = match (state, reply) {
            (QueryState::Succeeded { attempts }, Some(reply)) => {
                QueryResponse::success(reply.content, reply.latency_ms, attempts)
            }
            (state, _) => {
                let class = match state {
                    QueryState::Failed { class, .. } => class,
                    _ => FailureClass::Rejected,
                };
                let message = last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "Unknown error".to_string());
                tracing::error!("Query {} failed after {} attempts: {}", request, state.attempts(), message);
                QueryResponse::failed(
                    message,
                    class,
                    start.elapsed().as_millis() as u64,
                    state.attempts(),
                )
            }
        };

        self.log
            .append(&ResponseRecord::new(request.clone(), response.clone()).with_fingerprint(variant_text))
            .await?;

        Ok(response)
    }

    /// Single attempt with a timeout
    async fn try_complete(
        &self,
        provider: &Arc<dyn LLMProvider>,
        model_id: &str,
        prompt: &str,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = CompletionRequest::new(vec![Message::user(prompt)], self.config.max_tokens)
            .with_model(model_id)
            .with_temperature(self.config.temperature);

        let timeout = Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(timeout, provider.complete(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                timeout_ms: self.config.timeout_ms,
            }),
        }
    }

    /// Query every (model, problem, variant, repetition) triple not yet in the log
    pub async fn batch_query(
        &self,
        problems: &[Problem],
        repeat: u32,
    ) -> Result<RunSummary, ExecutorError> {
        let done = completed_keys(&ResponseLog::load(self.log.path())?, problems);
        let mut summary = RunSummary::default();

        let (tx, rx) = mpsc::unbounded_channel();
        let mut queued: HashSet<QueryRequest> = HashSet::new();

        for model in self.models() {
            for problem in problems {
                for (variant, text) in problem.paraphrases.iter() {
                    for repetition in 0..repeat {
                        let request =
                            QueryRequest::new(model.clone(), problem.id.clone(), variant, repetition);
                        if !queued.insert(request.clone()) {
                            continue;
                        }
                        summary.total += 1;
                        if done.contains(&request) {
                            summary.skipped += 1;
                            continue;
                        }
                        // the receiver is alive until the end of this function
                        let _ = tx.send(WorkItem {
                            request,
                            text: text.to_string(),
                        });
                    }
                }
            }
        }
        drop(tx);

        let pending = summary.total - summary.skipped;
        tracing::info!(
            "Batch: {} triples, {} already complete, {} to query with {} workers",
            summary.total,
            summary.skipped,
            pending,
            self.config.parallel_requests
        );

        let queue = Arc::new(Mutex::new(rx));
        let halt = Arc::new(Halt::default());
        let progress = Arc::new(AtomicUsize::new(0));
        let mut workers = JoinSet::new();

        for _ in 0..self.config.parallel_requests.min(pending.max(1)) {
            let executor = self.clone();
            let queue = Arc::clone(&queue);
            let halt = Arc::clone(&halt);
            let progress = Arc::clone(&progress);
            workers.spawn(async move { executor.worker(queue, halt, progress, pending).await });
        }

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(partial)) => summary.merge(&partial),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => tracing::error!("Query worker panicked: {}", e),
            }
        }

        {
            let mut rx = queue.lock().await;
            while rx.try_recv().is_ok() {
                summary.cancelled += 1;
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if let Some((model, message)) = halt.take_reason() {
            tracing::error!(
                "Halting batch: backend for {} unavailable ({} triples not started)",
                model,
                summary.cancelled
            );
            return Err(ExecutorError::BackendUnavailable {
                model,
                message,
                summary,
            });
        }
        if summary.cancelled > 0 {
            tracing::info!("Batch cancelled; {} triples not started", summary.cancelled);
        }

        tracing::info!(
            "Batch finished: {} succeeded ({} after retries), {} failed",
            summary.succeeded,
            summary.retried_then_succeeded,
            summary.failed
        );
        Ok(summary)
    }

    async fn worker(
        self,
        queue: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
        halt: Arc<Halt>,
        progress: Arc<AtomicUsize>,
        pending: usize,
    ) -> Result<RunSummary, ExecutorError> {
        let mut summary = RunSummary::default();

        loop {
            if halt.is_tripped() || *self.cancel.borrow() {
                break;
            }
            let item = queue.lock().await.recv().await;
            let Some(item) = item else { break };

            summary.attempted += 1;
            let response = match self.query(&item.request, &item.text).await {
                Ok(response) => response,
                Err(e) => {
                    halt.trip(None);
                    return Err(e);
                }
            };

            if response.is_success() {
                summary.succeeded += 1;
                if response.attempts > 1 {
                    summary.retried_then_succeeded += 1;
                }
            } else {
                summary.failed += 1;
                if response.failure_class == Some(FailureClass::BackendFatal) {
                    halt.trip(Some((
                        item.request.model_id.clone(),
                        response.error.clone().unwrap_or_default(),
                    )));
                }
            }

            let completed = progress.fetch_add(1, Ordering::SeqCst) + 1;
            if completed % 50 == 0 || completed == pending {
                tracing::info!("Progress: {}/{} queries complete", completed, pending);
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problems::{generate, Category, VariantKey};
    use crate::providers::ProviderResult;
    use crate::runner::RateLimiter;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Answers "答案是 42" after failing the first `failures` calls with `error`
    struct FlakyProvider {
        calls: AtomicUsize,
        failures: usize,
        error: fn() -> ProviderError,
        limiter: Arc<RateLimiter>,
    }

    impl FlakyProvider {
        fn new(failures: usize, error: fn() -> ProviderError) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures,
                error,
                limiter: Arc::new(RateLimiter::new(10_000, 0)),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        fn default_model(&self) -> &str {
            "flaky-1"
        }

        async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err((self.error)());
            }
            assert!(request.prompt().ends_with("請直接給出數值答案。"));
            Ok(CompletionResponse {
                content: "答案是 42".to_string(),
                model: "flaky-1".to_string(),
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: "stop".to_string(),
                latency_ms: 5,
            })
        }

        fn rate_limiter(&self) -> &Arc<RateLimiter> {
            &self.limiter
        }
    }

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            parallel_requests: 2,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
            timeout_ms: 1_000,
            temperature: 0.0,
            max_tokens: 64,
            answer_instruction: "請直接給出數值答案。".to_string(),
        }
    }

    async fn executor(provider: Arc<FlakyProvider>, dir: &std::path::Path) -> Executor {
        let mut backends: Backends = HashMap::new();
        backends.insert("flaky-1".to_string(), provider);
        let log = Arc::new(ResponseLog::open(dir.join("responses.jsonl")).await.unwrap());
        Executor::new(backends, log, config())
    }

    fn server_error() -> ProviderError {
        ProviderError::Api {
            status: 503,
            message: "overloaded".into(),
        }
    }

    #[tokio::test]
    async fn test_query_retries_transient_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FlakyProvider::new(2, server_error));
        let exec = executor(provider.clone(), dir.path()).await;

        let request = QueryRequest::new("flaky-1", "arith_001", VariantKey::Direct, 0);
        let response = exec.query(&request, "計算 40 + 2").await.unwrap();

        assert!(response.is_success());
        assert_eq!(response.attempts, 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

        let records = ResponseLog::load(dir.path().join("responses.jsonl")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].response.text, "答案是 42");
    }

    #[tokio::test]
    async fn test_query_rejected_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FlakyProvider::new(1, || ProviderError::Api {
            status: 400,
            message: "bad request".into(),
        }));
        let exec = executor(provider.clone(), dir.path()).await;

        let request = QueryRequest::new("flaky-1", "arith_001", VariantKey::Direct, 0);
        let response = exec.query(&request, "計算 40 + 2").await.unwrap();

        assert!(!response.is_success());
        assert_eq!(response.failure_class, Some(FailureClass::Rejected));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_model() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(Arc::new(FlakyProvider::new(0, server_error)), dir.path()).await;
        let request = QueryRequest::new("missing", "arith_001", VariantKey::Direct, 0);
        assert!(matches!(
            exec.query(&request, "q").await,
            Err(ExecutorError::UnknownModel(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(Arc::new(FlakyProvider::new(0, server_error)), dir.path()).await;
        let request = QueryRequest::new("flaky-1", "arith_001", VariantKey::Direct, 0);

        let guard = exec.claim(&request).unwrap();
        assert!(matches!(
            exec.query(&request, "q").await,
            Err(ExecutorError::DuplicateInFlight(_))
        ));
        drop(guard);
        assert!(exec.query(&request, "q").await.is_ok());
    }

    #[tokio::test]
    async fn test_batch_summary_counts() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FlakyProvider::new(1, server_error));
        let exec = executor(provider, dir.path()).await;
        let problems = generate(Category::Arithmetic, 2, 7).unwrap();

        let summary = exec.batch_query(&problems, 2).await.unwrap();
        assert_eq!(summary.total, 12);
        assert_eq!(summary.attempted, 12);
        assert_eq!(summary.succeeded, 12);
        assert_eq!(summary.retried_then_succeeded, 1);
        assert_eq!(summary.failed, 0);

        // everything is complete now
        let again = exec.batch_query(&problems, 2).await.unwrap();
        assert_eq!(again.skipped, 12);
        assert_eq!(again.attempted, 0);
    }

    #[tokio::test]
    async fn test_backend_fatal_halts_batch() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FlakyProvider::new(usize::MAX, || {
            ProviderError::Auth("invalid x-api-key".into())
        }));
        let mut cfg = config();
        cfg.parallel_requests = 1;
        let mut backends: Backends = HashMap::new();
        backends.insert("flaky-1".to_string(), provider.clone());
        let log = Arc::new(ResponseLog::open(dir.path().join("r.jsonl")).await.unwrap());
        let exec = Executor::new(backends, log, cfg);

        let problems = generate(Category::Percentage, 3, 7).unwrap();
        match exec.batch_query(&problems, 1).await {
            Err(ExecutorError::BackendUnavailable { model, summary, .. }) => {
                assert_eq!(model, "flaky-1");
                assert_eq!(summary.failed, 1);
                assert_eq!(summary.cancelled, 8);
            }
            other => panic!("expected halt, got {:?}", other.map(|_| ())),
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_batch_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FlakyProvider::new(0, server_error));
        let exec = executor(provider.clone(), dir.path()).await;
        exec.cancel_handle().cancel();
        assert!(exec.cancel_handle().is_cancelled());

        let problems = generate(Category::Comparison, 2, 7).unwrap();
        let summary = exec.batch_query(&problems, 1).await.unwrap();
        assert_eq!(summary.attempted, 0);
        assert_eq!(summary.cancelled, 6);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
