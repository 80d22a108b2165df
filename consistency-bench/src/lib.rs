//! Numerical-reasoning consistency probe for LLMs
//!
//! The same arithmetic, percentage, unit-conversion or comparison problem is
//! posed through three paraphrases, each repeated several times, and the
//! stability of the extracted answers is scored.
//!
//! # Pipeline
//!
//! - [`problems`] generates problems with exact ground truth and paraphrases
//! - [`runner`] queries model backends with retry, rate limiting and a
//!   resumable response log
//! - [`extraction`] pulls a normalized answer out of free-form text
//! - [`analysis`] computes accuracy, cross-paraphrase and test-retest
//!   consistency, and classifies errors
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use consistency_bench::{
//!     analysis::Evaluator,
//!     config::Config,
//!     problems::QuestionGenerator,
//!     providers::create_backends,
//!     runner::{Executor, ExecutorConfig, ResponseLog},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_or_default();
//!     let problems = QuestionGenerator::new().generate_corpus(&config.category_counts()?, 42)?;
//!
//!     let log = Arc::new(ResponseLog::open("results/responses.jsonl").await?);
//!     let executor = Executor::new(create_backends(&config)?, log, ExecutorConfig::from_config(&config));
//!     let summary = executor.batch_query(&problems, 3).await?;
//!     println!("{} succeeded", summary.succeeded);
//!
//!     let records = ResponseLog::load("results/responses.jsonl")?;
//!     let evaluation = Evaluator::new(3).evaluate(&problems, &records);
//!     for model in evaluation.models() {
//!         println!("{}: {:?}", model, evaluation.overall(model).map(|a| a.ocs));
//!     }
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod config;
pub mod extraction;
pub mod problems;
pub mod providers;
pub mod reporting;
pub mod runner;

pub use config::Config;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::analysis::{
        AggregateRecord, AggregateScope, ErrorCategory, Evaluation, EvaluationRecord, Evaluator,
    };
    pub use crate::config::Config;
    pub use crate::extraction::{extract, ExpectedKind, ExtractedAnswer, Extraction};
    pub use crate::problems::{
        AnswerValue, Category, Operand, Operation, Problem, QuestionGenerator, VariantKey,
    };
    pub use crate::providers::{
        create_backends, CompletionRequest, CompletionResponse, LLMProvider, Message,
        ProviderError, ProviderResult,
    };
    pub use crate::reporting::{print_console_report, print_run_summary, CsvWriter, JsonSummary};
    pub use crate::runner::{
        CancelHandle, Executor, ExecutorConfig, QueryRequest, QueryResponse, ResponseLog,
        RunSummary,
    };
}
