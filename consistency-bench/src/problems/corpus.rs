//! Question corpus file reading and writing

use std::path::Path;

use super::Problem;

/// Error type for corpus loading
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid problem {id}: {reason}")]
    Invalid { id: String, reason: String },
}

/// Serialize problems as pretty JSON
pub fn serialize_corpus(problems: &[Problem]) -> Result<String, CorpusError> {
    Ok(serde_json::to_string_pretty(problems)?)
}

/// Parse and verify a corpus
pub fn parse_corpus(content: &str) -> Result<Vec<Problem>, CorpusError> {
    let problems: Vec<Problem> = serde_json::from_str(content)?;
    let mut seen = std::collections::HashSet::new();

    for problem in &problems {
        if !seen.insert(problem.id.as_str()) {
            return Err(CorpusError::Invalid {
                id: problem.id.clone(),
                reason: "duplicate id".to_string(),
            });
        }
        if problem.operation.category() != problem.category {
            return Err(CorpusError::Invalid {
                id: problem.id.clone(),
                reason: format!(
                    "operation {} does not belong to category {}",
                    problem.operation, problem.category
                ),
            });
        }
        if !(problem.tolerance.is_finite() && problem.tolerance > 0.0) {
            return Err(CorpusError::Invalid {
                id: problem.id.clone(),
                reason: format!("tolerance {} must be positive", problem.tolerance),
            });
        }
        match problem.solve() {
            Some(solved) if solved.matches(&problem.ground_truth, 1e-9) => {}
            Some(solved) => {
                return Err(CorpusError::Invalid {
                    id: problem.id.clone(),
                    reason: format!(
                        "ground truth {} does not match operands ({})",
                        problem.ground_truth, solved
                    ),
                })
            }
            None => {
                return Err(CorpusError::Invalid {
                    id: problem.id.clone(),
                    reason: "operands cannot be solved".to_string(),
                })
            }
        }
    }

    Ok(problems)
}

pub fn save_corpus(path: impl AsRef<Path>, problems: &[Problem]) -> Result<(), CorpusError> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serialize_corpus(problems)?)?;
    Ok(())
}

pub fn load_corpus(path: impl AsRef<Path>) -> Result<Vec<Problem>, CorpusError> {
    let content = std::fs::read_to_string(path)?;
    parse_corpus(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problems::{generate, AnswerValue, Category};

    #[test]
    fn test_round_trip_every_category() {
        for category in Category::all() {
            let problems = generate(category, 8, 21).unwrap();
            let text = serialize_corpus(&problems).unwrap();
            assert_eq!(parse_corpus(&text).unwrap(), problems);
        }
    }

    #[test]
    fn test_tampered_ground_truth_rejected() {
        let mut problems = generate(Category::Arithmetic, 1, 21).unwrap();
        problems[0].ground_truth = AnswerValue::Number(-1.0);
        let text = serialize_corpus(&problems).unwrap();
        assert!(matches!(parse_corpus(&text), Err(CorpusError::Invalid { .. })));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut problems = generate(Category::Percentage, 2, 21).unwrap();
        problems[1].id = problems[0].id.clone();
        let text = serialize_corpus(&problems).unwrap();
        assert!(matches!(parse_corpus(&text), Err(CorpusError::Invalid { .. })));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("questions.json");
        let problems = generate(Category::Conversion, 4, 3).unwrap();
        save_corpus(&path, &problems).unwrap();
        assert_eq!(load_corpus(&path).unwrap(), problems);
    }
}
