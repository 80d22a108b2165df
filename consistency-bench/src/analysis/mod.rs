//! Consistency and accuracy evaluation
//!
//! Answers are arranged in a variant x repetition grid per (model, problem).
//! Cross-paraphrase consistency clusters each repetition's three variants,
//! test-retest consistency clusters each variant's repetitions, and OCS is the
//! mean of the two averages. Every wrong answer gets exactly one error category.

pub mod consistency;
pub mod errors;
pub mod evaluator;

pub use consistency::cluster_score;
pub use errors::{classify, is_computation_error, is_correct, ErrorCategory, ErrorTally};
pub use evaluator::{
    aggregate, AggregateRecord, AggregateScope, AnswerGrid, Evaluation, EvaluationInputError,
    EvaluationRecord, Evaluator, SkippedProblem,
};
