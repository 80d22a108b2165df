//! Query execution engine

pub mod executor;
pub mod rate_limiter;
pub mod response_log;
pub mod retry;

pub use executor::{CancelHandle, Executor, ExecutorConfig, ExecutorError, RunSummary};
pub use rate_limiter::RateLimiter;
pub use response_log::{
    completed_keys, fingerprint, LogError, QueryRequest, QueryResponse, QueryStatus, ResponseLog, ResponseRecord,
};
pub use retry::{AttemptOutcome, QueryState, RetryPolicy};
