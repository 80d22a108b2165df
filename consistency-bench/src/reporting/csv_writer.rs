//! Tabular CSV output for evaluation records and aggregates

use std::io::Write;
use std::path::Path;

use crate::analysis::{AggregateRecord, ErrorTally, EvaluationRecord};

const METRIC_COLUMNS: [&str; 10] = [
    "responses",
    "correct",
    "accuracy",
    "cross_paraphrase",
    "test_retest",
    "ocs",
    "refusal",
    "format_error",
    "computation_error",
    "comprehension_error",
];

/// Write evaluation results as CSV
pub struct CsvWriter;

impl CsvWriter {
    /// One row per (model, problem)
    pub fn write_records<W: Write>(out: W, records: &[EvaluationRecord]) -> csv::Result<()> {
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(header(&["model", "problem_id", "category", "operation"]))?;
        for r in records {
            let mut row = vec![
                r.model.clone(),
                r.problem_id.clone(),
                r.category.to_string(),
                r.operation.to_string(),
            ];
            row.extend(metrics(r.responses, r.correct, r.accuracy, r.cross_paraphrase, r.test_retest, r.ocs, &r.errors));
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// One row per aggregate bucket
    pub fn write_aggregates<W: Write>(out: W, aggregates: &[AggregateRecord]) -> csv::Result<()> {
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(header(&["model", "scope", "key", "problems"]))?;
        for a in aggregates {
            let mut row = vec![
                a.model.clone(),
                a.scope.as_str().to_string(),
                a.key.clone(),
                a.problems.to_string(),
            ];
            row.extend(metrics(a.responses, a.correct, a.accuracy, a.cross_paraphrase, a.test_retest, a.ocs, &a.errors));
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_records_file(path: impl AsRef<Path>, records: &[EvaluationRecord]) -> csv::Result<()> {
        Self::write_records(std::fs::File::create(path)?, records)
    }

    pub fn write_aggregates_file(path: impl AsRef<Path>, aggregates: &[AggregateRecord]) -> csv::Result<()> {
        Self::write_aggregates(std::fs::File::create(path)?, aggregates)
    }
}

fn header(leading: &[&str]) -> Vec<String> {
    leading
        .iter()
        .chain(METRIC_COLUMNS.iter())
        .map(|c| c.to_string())
        .collect()
}

fn metrics(
    responses: usize,
    correct: usize,
    accuracy: f64,
    cross: f64,
    retest: f64,
    ocs: f64,
    errors: &ErrorTally,
) -> Vec<String> {
    vec![
        responses.to_string(),
        correct.to_string(),
        format!("{:.4}", accuracy),
        format!("{:.4}", cross),
        format!("{:.4}", retest),
        format!("{:.4}", ocs),
        errors.refusal.to_string(),
        errors.format_error.to_string(),
        errors.computation_error.to_string(),
        errors.comprehension_error.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AggregateScope;
    use crate::problems::{Category, Operation};

    fn record() -> EvaluationRecord {
        EvaluationRecord {
            model: "gpt-4o".into(),
            problem_id: "arith_001".into(),
            category: Category::Arithmetic,
            operation: Operation::Addition,
            responses: 9,
            correct: 8,
            accuracy: 8.0 / 9.0,
            cross_paraphrase: 1.0,
            test_retest: 2.0 / 3.0,
            ocs: 5.0 / 6.0,
            errors: ErrorTally {
                computation_error: 1,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_record_rows() {
        let mut out = Vec::new();
        CsvWriter::write_records(&mut out, &[record()]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "model,problem_id,category,operation,responses,correct,accuracy,cross_paraphrase,test_retest,ocs,refusal,format_error,computation_error,comprehension_error"
        );
        assert_eq!(
            lines[1],
            "gpt-4o,arith_001,arithmetic,addition,9,8,0.8889,1.0000,0.6667,0.8333,0,0,1,0"
        );
    }

    #[test]
    fn test_aggregate_rows_and_quoting() {
        let aggregate = AggregateRecord {
            model: "local,7b".into(),
            scope: AggregateScope::Category,
            key: "arithmetic".into(),
            problems: 1,
            responses: 9,
            correct: 9,
            accuracy: 1.0,
            cross_paraphrase: 1.0,
            test_retest: 1.0,
            ocs: 1.0,
            errors: ErrorTally::default(),
        };
        let mut out = Vec::new();
        CsvWriter::write_aggregates(&mut out, &[aggregate]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("model,scope,key,problems,responses"));
        assert!(text.contains("\"local,7b\",category,arithmetic,1,9,9,1.0000"));
    }

    #[test]
    fn test_records_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evaluation.csv");
        let mut odd = record();
        odd.model = "say \"hi\"\nmodel".into();
        CsvWriter::write_records_file(&path, &[record(), odd]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.headers().unwrap().len(), 14);
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][0], "say \"hi\"\nmodel");
        assert_eq!(&rows[1][6], "0.8889");
    }
}
