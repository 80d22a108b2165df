//! Per-problem consistency and accuracy, and their aggregates

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::consistency::{cluster_score, mean};
use super::errors::{classify, ErrorTally};
use crate::extraction::{extract, ExpectedKind, ExtractedAnswer};
use crate::problems::{AnswerValue, Category, Operation, Problem, VariantKey};
use crate::runner::{QueryStatus, ResponseRecord};

/// Input problems that make a problem's evaluation impossible
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationInputError {
    #[error("no successful responses for {problem_id} from {model}")]
    NoResponses { model: String, problem_id: String },

    #[error("ground truth of {0} is not a finite number")]
    NonFiniteGroundTruth(String),

    #[error("malformed record for {problem_id}: {reason}")]
    MalformedRecord { problem_id: String, reason: String },

    #[error("ground truth of {0} does not match its operation")]
    KindMismatch(String),
}

/// Metrics for one (model, problem) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub model: String,
    pub problem_id: String,
    pub category: Category,
    pub operation: Operation,
    /// Successful responses found
    pub responses: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub cross_paraphrase: f64,
    pub test_retest: f64,
    pub ocs: f64,
    pub errors: ErrorTally,
}

/// Which dimension an aggregate is bucketed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateScope {
    Overall,
    Category,
    Operation,
}

impl AggregateScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateScope::Overall => "overall",
            AggregateScope::Category => "category",
            AggregateScope::Operation => "operation",
        }
    }
}

/// Metrics rolled up over a bucket of problems
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub model: String,
    pub scope: AggregateScope,
    pub key: String,
    pub problems: usize,
    pub responses: usize,
    pub correct: usize,
    /// Correct over responses, pooled across the bucket
    pub accuracy: f64,
    pub cross_paraphrase: f64,
    pub test_retest: f64,
    pub ocs: f64,
    pub errors: ErrorTally,
}

/// A problem left out of the evaluation, and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedProblem {
    pub model: String,
    pub problem_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub records: Vec<EvaluationRecord>,
    pub aggregates: Vec<AggregateRecord>,
    pub skipped: Vec<SkippedProblem>,
}

impl Evaluation {
    /// Overall aggregate for one model
    pub fn overall(&self, model: &str) -> Option<&AggregateRecord> {
        self.aggregates
            .iter()
            .find(|a| a.model == model && a.scope == AggregateScope::Overall)
    }

    pub fn models(&self) -> Vec<&str> {
        let mut models: Vec<&str> = Vec::new();
        for record in &self.records {
            if !models.contains(&record.model.as_str()) {
                models.push(&record.model);
            }
        }
        models
    }
}

/// The variant x repetition grid of answers for one (model, problem)
pub type AnswerGrid = HashMap<(VariantKey, u32), ExtractedAnswer>;

/// Computes evaluation records; a pure function of its inputs
pub struct Evaluator {
    repeat: u32,
}

impl Evaluator {
    pub fn new(repeat: u32) -> Self {
        Self {
            repeat: repeat.max(1),
        }
    }

    /// Evaluate every (model, problem) pair present in `records`
    pub fn evaluate(&self, problems: &[Problem], records: &[ResponseRecord]) -> Evaluation {
        let known: HashMap<&str, &Problem> = problems.iter().map(|p| (p.id.as_str(), p)).collect();

        // latest successful record per triple wins
        let mut latest: IndexMap<String, HashMap<&str, HashMap<(VariantKey, u32), &ResponseRecord>>> =
            IndexMap::new();
        let mut malformed: HashMap<(String, String), String> = HashMap::new();

        for record in records {
            let req = &record.request;
            let Some(problem) = known.get(req.problem_id.as_str()) else {
                tracing::debug!("Ignoring response for unknown problem {}", req.problem_id);
                continue;
            };
            if !record.answers(problem.paraphrases.get(req.variant)) {
                tracing::debug!("Ignoring response to an older wording of {}", req);
                continue;
            }
            if req.repetition >= self.repeat {
                continue;
            }
            if let Err(reason) = check_record(record) {
                latest.entry(req.model_id.clone()).or_default();
                malformed
                    .entry((req.model_id.clone(), req.problem_id.clone()))
                    .or_insert(reason);
                continue;
            }
            let cells = latest
                .entry(req.model_id.clone())
                .or_default()
                .entry(req.problem_id.as_str())
                .or_default();
            if record.response.status == QueryStatus::Success {
                cells.insert((req.variant, req.repetition), record);
            }
        }

        let mut models: Vec<String> = latest.keys().cloned().collect();
        models.sort();

        let mut evaluation = Evaluation::default();

        for model in &models {
            for problem in problems {
                let key = (model.clone(), problem.id.clone());
                let cells = latest.get(model).and_then(|m| m.get(problem.id.as_str()));

                let result = match (malformed.get(&key), cells) {
                    (Some(reason), _) => Err(EvaluationInputError::MalformedRecord {
                        problem_id: problem.id.clone(),
                        reason: reason.clone(),
                    }),
                    (None, None) => continue,
                    (None, Some(cells)) => {
                        let grid: AnswerGrid = cells
                            .iter()
                            .map(|(cell, record)| {
                                (*cell, extract(&record.response.text, &problem.expected_kind()))
                            })
                            .collect();
                        self.evaluate_problem(model, problem, &grid)
                    }
                };

                match result {
                    Ok(record) => evaluation.records.push(record),
                    Err(e) => {
                        tracing::warn!("Skipping {} for {}: {}", problem.id, model, e);
                        evaluation.skipped.push(SkippedProblem {
                            model: model.clone(),
                            problem_id: problem.id.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        evaluation.aggregates = aggregate(&evaluation.records);
        evaluation
    }

    /// Metrics for one problem from its grid of extracted answers
    pub fn evaluate_problem(
        &self,
        model: &str,
        problem: &Problem,
        grid: &AnswerGrid,
    ) -> Result<EvaluationRecord, EvaluationInputError> {
        check_problem(problem)?;
        if grid.is_empty() {
            return Err(EvaluationInputError::NoResponses {
                model: model.to_string(),
                problem_id: problem.id.clone(),
            });
        }

        let value_at =
            |variant: VariantKey, rep: u32| grid.get(&(variant, rep)).and_then(|a| a.value());

        let cross: Vec<f64> = (0..self.repeat)
            .map(|rep| {
                let cells: Vec<Option<&AnswerValue>> =
                    VariantKey::all().iter().map(|v| value_at(*v, rep)).collect();
                cluster_score(&cells, problem.tolerance)
            })
            .collect();

        let retest: Vec<f64> = VariantKey::all()
            .iter()
            .map(|v| {
                let cells: Vec<Option<&AnswerValue>> =
                    (0..self.repeat).map(|rep| value_at(*v, rep)).collect();
                cluster_score(&cells, problem.tolerance)
            })
            .collect();

        let mut errors = ErrorTally::default();
        let mut correct = 0;
        for answer in grid.values() {
            match classify(problem, answer) {
                None => correct += 1,
                Some(category) => errors.add(category),
            }
        }

        let cross_paraphrase = mean(&cross);
        let test_retest = mean(&retest);

        Ok(EvaluationRecord {
            model: model.to_string(),
            problem_id: problem.id.clone(),
            category: problem.category,
            operation: problem.operation,
            responses: grid.len(),
            correct,
            accuracy: correct as f64 / grid.len() as f64,
            cross_paraphrase,
            test_retest,
            ocs: (cross_paraphrase + test_retest) / 2.0,
            errors,
        })
    }
}

fn check_problem(problem: &Problem) -> Result<(), EvaluationInputError> {
    match (&problem.ground_truth, problem.expected_kind()) {
        (AnswerValue::Number(v), ExpectedKind::Number | ExpectedKind::Maximum { .. }) => {
            if v.is_finite() {
                Ok(())
            } else {
                Err(EvaluationInputError::NonFiniteGroundTruth(problem.id.clone()))
            }
        }
        (AnswerValue::Sequence(_), ExpectedKind::Ordering { .. }) => Ok(()),
        _ => Err(EvaluationInputError::KindMismatch(problem.id.clone())),
    }
}

/// A record is malformed when its status contradicts its payload
fn check_record(record: &ResponseRecord) -> Result<(), String> {
    let response = &record.response;
    match response.status {
        QueryStatus::Success if response.error.is_some() => {
            Err("successful response carries an error".to_string())
        }
        QueryStatus::Failed if !response.text.is_empty() => {
            Err("failed response carries text".to_string())
        }
        _ if response.attempts == 0 => Err("response records zero attempts".to_string()),
        _ => Ok(()),
    }
}

#[derive(Default)]
struct Bucket {
    problems: usize,
    responses: usize,
    correct: usize,
    cross: Vec<f64>,
    retest: Vec<f64>,
    ocs: Vec<f64>,
    errors: ErrorTally,
}

impl Bucket {
    fn add(&mut self, record: &EvaluationRecord) {
        self.problems += 1;
        self.responses += record.responses;
        self.correct += record.correct;
        self.cross.push(record.cross_paraphrase);
        self.retest.push(record.test_retest);
        self.ocs.push(record.ocs);
        self.errors.merge(&record.errors);
    }

    fn finish(self, model: &str, scope: AggregateScope, key: &str) -> AggregateRecord {
        AggregateRecord {
            model: model.to_string(),
            scope,
            key: key.to_string(),
            problems: self.problems,
            responses: self.responses,
            correct: self.correct,
            accuracy: if self.responses == 0 {
                0.0
            } else {
                self.correct as f64 / self.responses as f64
            },
            cross_paraphrase: mean(&self.cross),
            test_retest: mean(&self.retest),
            ocs: mean(&self.ocs),
            errors: self.errors,
        }
    }
}

/// Roll records up per model overall, per (model, category) and per (model, operation)
pub fn aggregate(records: &[EvaluationRecord]) -> Vec<AggregateRecord> {
    let mut buckets: IndexMap<(String, AggregateScope, String), Bucket> = IndexMap::new();

    for record in records {
        for (scope, key) in [
            (AggregateScope::Overall, "all"),
            (AggregateScope::Category, record.category.as_str()),
            (AggregateScope::Operation, record.operation.as_str()),
        ] {
            buckets
                .entry((record.model.clone(), scope, key.to_string()))
                .or_default()
                .add(record);
        }
    }

    let mut aggregates: Vec<AggregateRecord> = buckets
        .into_iter()
        .map(|((model, scope, key), bucket)| bucket.finish(&model, scope, &key))
        .collect();
    aggregates.sort_by(|a, b| {
        (a.model.as_str(), scope_rank(a.scope), a.key.as_str())
            .cmp(&(b.model.as_str(), scope_rank(b.scope), b.key.as_str()))
    });
    aggregates
}

fn scope_rank(scope: AggregateScope) -> u8 {
    match scope {
        AggregateScope::Overall => 0,
        AggregateScope::Category => 1,
        AggregateScope::Operation => 2,
    }
}
