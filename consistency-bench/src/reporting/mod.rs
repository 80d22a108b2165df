//! Results reporting

pub mod csv_writer;

pub use csv_writer::CsvWriter;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::analysis::{AggregateScope, Evaluation, ErrorTally};
use crate::runner::RunSummary;

/// Overall metrics for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub model: String,
    pub problems: usize,
    pub responses: usize,
    pub accuracy: f64,
    pub cross_paraphrase: f64,
    pub test_retest: f64,
    pub ocs: f64,
    pub errors: ErrorTally,
}

/// JSON summary export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSummary {
    pub run_id: String,
    pub timestamp: String,
    pub repetitions: u32,
    pub total_problems: usize,
    pub models: Vec<ModelSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunSummary>,
    pub skipped_problems: usize,
    pub evaluation_file: String,
    pub aggregates_file: String,
}

impl JsonSummary {
    /// Create from an evaluation, ranked by OCS
    pub fn from_evaluation(
        run_id: impl Into<String>,
        evaluation: &Evaluation,
        repetitions: u32,
        run: Option<RunSummary>,
    ) -> Self {
        let mut models: Vec<ModelSummary> = evaluation
            .aggregates
            .iter()
            .filter(|a| a.scope == AggregateScope::Overall)
            .map(|a| ModelSummary {
                model: a.model.clone(),
                problems: a.problems,
                responses: a.responses,
                accuracy: a.accuracy,
                cross_paraphrase: a.cross_paraphrase,
                test_retest: a.test_retest,
                ocs: a.ocs,
                errors: a.errors,
            })
            .collect();

        models.sort_by(|a, b| b.ocs.partial_cmp(&a.ocs).unwrap_or(std::cmp::Ordering::Equal));

        let mut problem_ids: Vec<&str> = evaluation.records.iter().map(|r| r.problem_id.as_str()).collect();
        problem_ids.sort_unstable();
        problem_ids.dedup();

        Self {
            run_id: run_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            repetitions,
            total_problems: problem_ids.len(),
            models,
            run,
            skipped_problems: evaluation.skipped.len(),
            evaluation_file: "evaluation.csv".to_string(),
            aggregates_file: "aggregates.csv".to_string(),
        }
    }

    /// Write to JSON file
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

/// Write `evaluation.csv`, `aggregates.csv` and `summary.json` into `dir`
pub fn write_outputs(dir: impl AsRef<Path>, evaluation: &Evaluation, summary: &JsonSummary) -> std::io::Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    CsvWriter::write_records_file(dir.join(&summary.evaluation_file), &evaluation.records)?;
    CsvWriter::write_aggregates_file(dir.join(&summary.aggregates_file), &evaluation.aggregates)?;
    summary.write_to_file(dir.join("summary.json"))?;
    tracing::info!("Wrote evaluation outputs to {}", dir.display());
    Ok(())
}

/// Print the query run summary
pub fn print_run_summary(summary: &RunSummary) {
    println!("\n=== Query Run Summary ===\n");
    println!("{:-<50}", "");
    println!("  Triples:                {}", summary.total);
    println!("  Skipped (already done): {}", summary.skipped);
    println!("  Attempted:              {}", summary.attempted);
    println!("  Succeeded:              {}", summary.succeeded);
    println!("  Retried then succeeded: {}", summary.retried_then_succeeded);
    println!("  Permanently failed:     {}", summary.failed);
    if summary.cancelled > 0 {
        println!("  Not started:            {}", summary.cancelled);
    }
}

/// Generate a console report
pub fn print_console_report(evaluation: &Evaluation) {
    println!("\n=== Numeric Consistency Results ===\n");

    println!("Models (ranked by OCS):");
    println!("{:-<78}", "");
    println!(
        "  {:<28} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "model", "problems", "accuracy", "cross", "retest", "ocs"
    );

    let mut overall: Vec<_> = evaluation
        .aggregates
        .iter()
        .filter(|a| a.scope == AggregateScope::Overall)
        .collect();
    overall.sort_by(|a, b| b.ocs.partial_cmp(&a.ocs).unwrap_or(std::cmp::Ordering::Equal));

    for (i, a) in overall.iter().enumerate() {
        println!(
            "  {}. {:<25} {:>8} {:>8.3} {:>8.3} {:>8.3} {:>8.3}",
            i + 1,
            a.model,
            a.problems,
            a.accuracy,
            a.cross_paraphrase,
            a.test_retest,
            a.ocs
        );
    }

    let by_category: Vec<_> = evaluation
        .aggregates
        .iter()
        .filter(|a| a.scope == AggregateScope::Category)
        .collect();
    if !by_category.is_empty() {
        println!("\nBy Category:");
        println!("{:-<78}", "");
        for a in by_category {
            println!(
                "  {:<20} {:<12} acc {:.3}  ocs {:.3}  errors r/f/c/u {}/{}/{}/{}",
                a.model,
                a.key,
                a.accuracy,
                a.ocs,
                a.errors.refusal,
                a.errors.format_error,
                a.errors.computation_error,
                a.errors.comprehension_error
            );
        }
    }

    if !evaluation.skipped.is_empty() {
        println!("\nSkipped: {} (model, problem) pairs", evaluation.skipped.len());
    }

    println!("\n{:=<78}", "");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AggregateRecord;

    fn evaluation() -> Evaluation {
        let overall = |model: &str, ocs: f64| AggregateRecord {
            model: model.into(),
            scope: AggregateScope::Overall,
            key: "all".into(),
            problems: 2,
            responses: 18,
            correct: 18,
            accuracy: 1.0,
            cross_paraphrase: ocs,
            test_retest: ocs,
            ocs,
            errors: ErrorTally::default(),
        };
        Evaluation {
            records: Vec::new(),
            aggregates: vec![overall("a", 0.5), overall("b", 0.9)],
            skipped: Vec::new(),
        }
    }

    #[test]
    fn test_summary_ranks_by_ocs() {
        let summary = JsonSummary::from_evaluation("run-1", &evaluation(), 3, None);
        assert_eq!(summary.models[0].model, "b");
        assert_eq!(summary.models[1].model, "a");
        assert!(summary.run.is_none());
    }

    #[test]
    fn test_write_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let evaluation = evaluation();
        let summary = JsonSummary::from_evaluation("run-1", &evaluation, 3, Some(RunSummary::default()));
        write_outputs(dir.path().join("out"), &evaluation, &summary).unwrap();

        let out = dir.path().join("out");
        assert!(out.join("evaluation.csv").exists());
        let aggregates = std::fs::read_to_string(out.join("aggregates.csv")).unwrap();
        assert_eq!(aggregates.lines().count(), 3);
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join("summary.json")).unwrap()).unwrap();
        assert_eq!(json["run_id"], "run-1");
        assert_eq!(json["run"]["succeeded"], 0);
    }
}
