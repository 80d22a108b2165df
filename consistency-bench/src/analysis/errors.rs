//! Error classification for individual answers

use serde::{Deserialize, Serialize};

use crate::extraction::{ExtractedAnswer, Extraction};
use crate::problems::{conversion, AnswerValue, Category, Operand, Operation, Problem};

/// Why an answer was not correct, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Nothing extractable, or an explicit refusal
    Refusal,
    /// Several conflicting candidate answers
    FormatError,
    /// A recognisable miscalculation on the right operands
    ComputationError,
    /// Any other wrong answer
    ComprehensionError,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Refusal => "refusal",
            ErrorCategory::FormatError => "format_error",
            ErrorCategory::ComputationError => "computation_error",
            ErrorCategory::ComprehensionError => "comprehension_error",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tally of error categories
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTally {
    pub refusal: usize,
    pub format_error: usize,
    pub computation_error: usize,
    pub comprehension_error: usize,
}

impl ErrorTally {
    pub fn add(&mut self, category: ErrorCategory) {
        match category {
            ErrorCategory::Refusal => self.refusal += 1,
            ErrorCategory::FormatError => self.format_error += 1,
            ErrorCategory::ComputationError => self.computation_error += 1,
            ErrorCategory::ComprehensionError => self.comprehension_error += 1,
        }
    }

    pub fn merge(&mut self, other: &ErrorTally) {
        self.refusal += other.refusal;
        self.format_error += other.format_error;
        self.computation_error += other.computation_error;
        self.comprehension_error += other.comprehension_error;
    }

    pub fn get(&self, category: ErrorCategory) -> usize {
        match category {
            ErrorCategory::Refusal => self.refusal,
            ErrorCategory::FormatError => self.format_error,
            ErrorCategory::ComputationError => self.computation_error,
            ErrorCategory::ComprehensionError => self.comprehension_error,
        }
    }

    pub fn total(&self) -> usize {
        self.refusal + self.format_error + self.computation_error + self.comprehension_error
    }
}

/// True when the answer is extracted and matches the ground truth
pub fn is_correct(problem: &Problem, answer: &ExtractedAnswer) -> bool {
    answer
        .value()
        .is_some_and(|v| v.matches(&problem.ground_truth, problem.tolerance))
}

/// Classify an answer, `None` when it is correct
pub fn classify(problem: &Problem, answer: &ExtractedAnswer) -> Option<ErrorCategory> {
    match &answer.extraction {
        Extraction::NotFound => Some(ErrorCategory::Refusal),
        Extraction::Ambiguous { .. } => Some(ErrorCategory::FormatError),
        Extraction::Ok { value } if value.matches(&problem.ground_truth, problem.tolerance) => None,
        Extraction::Ok { value } => {
            if is_computation_error(problem, value) {
                Some(ErrorCategory::ComputationError)
            } else {
                Some(ErrorCategory::ComprehensionError)
            }
        }
    }
}

/// Whether a wrong answer reuses the operands in a known miscalculation
pub fn is_computation_error(problem: &Problem, answer: &AnswerValue) -> bool {
    match (answer, &problem.ground_truth) {
        (AnswerValue::Sequence(given), AnswerValue::Sequence(truth)) => {
            given.len() == truth.len() && given.iter().eq(truth.iter().rev())
        }
        (AnswerValue::Number(given), AnswerValue::Number(truth)) => {
            let tol = problem.tolerance.max(1e-9);
            let close = |x: f64| x.is_finite() && (x - given).abs() <= tol;

            generic_slips(*given, *truth, tol)
                || operand_mistakes(problem, *truth)
                    .into_iter()
                    .any(close)
        }
        _ => false,
    }
}

/// Decimal shifts, sign flips and single-digit slips
fn generic_slips(given: f64, truth: f64, tol: f64) -> bool {
    if truth.abs() > tol {
        for k in 1..=3 {
            let factor = 10f64.powi(k);
            if (given - truth * factor).abs() <= tol || (given - truth / factor).abs() <= tol {
                return true;
            }
        }
        if (given + truth).abs() <= tol {
            return true;
        }
    }
    is_digit_slip(given, truth)
}

/// Integer answers differing by d * 10^k
fn is_digit_slip(given: f64, truth: f64) -> bool {
    if given.fract() != 0.0 || truth.fract() != 0.0 {
        return false;
    }
    let mut diff = (given - truth).abs();
    if diff == 0.0 || diff > 1e15 {
        return false;
    }
    while diff >= 10.0 && diff % 10.0 == 0.0 {
        diff /= 10.0;
    }
    (1.0..=9.0).contains(&diff)
}

/// Values a model produces when it applies the wrong step to the right operands
fn operand_mistakes(problem: &Problem, truth: f64) -> Vec<f64> {
    let nums = problem.numeric_operands();
    let mut candidates = Vec::new();

    match problem.category {
        Category::Arithmetic => {
            if let (Some(&a), Some(&b)) = (nums.first(), nums.get(1)) {
                for op in [
                    Operation::Addition,
                    Operation::Subtraction,
                    Operation::Multiplication,
                    Operation::Division,
                ] {
                    if op != problem.operation {
                        candidates.extend(op.apply_arithmetic(a, b));
                    }
                }
                candidates.push(b - a);
                if problem.operation == Operation::Division && b != 0.0 {
                    candidates.push((a / b).trunc());
                    candidates.push(b / a);
                }
            }
        }
        Category::Percentage => {
            if let (Some(&base), Some(&rate)) = (nums.first(), nums.get(1)) {
                candidates.push(base - truth);
                candidates.push(rate);
                candidates.push(base * rate);
            }
        }
        Category::Conversion => {
            if let [Operand::Number(x), Operand::Unit(from), Operand::Unit(to)] =
                problem.operands.as_slice()
            {
                if let Some(rule) = conversion::lookup(from, to) {
                    candidates.push(rule.apply_inverse(*x));
                    if rule.has_offset() {
                        candidates.push(*x * rule.scale.value());
                    }
                }
            }
        }
        Category::Comparison => {
            // reporting the smallest item when asked for the largest
            if problem.operation == Operation::Maximum {
                candidates.extend(nums.iter().copied().reduce(f64::min));
            }
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problems::DEFAULT_TOLERANCE;

    fn answer(v: f64) -> ExtractedAnswer {
        ExtractedAnswer {
            extraction: Extraction::Ok {
                value: AnswerValue::Number(v),
            },
            confidence_expressed: None,
        }
    }

    fn addition() -> Problem {
        Problem::build(
            "arith_001",
            Operation::Addition,
            vec![Operand::Number(234.0), Operand::Number(567.0)],
            DEFAULT_TOLERANCE,
        )
        .unwrap()
    }

    #[test]
    fn test_priority_order() {
        let p = addition();
        assert_eq!(classify(&p, &ExtractedAnswer::not_found()), Some(ErrorCategory::Refusal));
        let ambiguous = ExtractedAnswer {
            extraction: Extraction::Ambiguous {
                candidates: vec![AnswerValue::Number(1.0), AnswerValue::Number(2.0)],
            },
            confidence_expressed: None,
        };
        assert_eq!(classify(&p, &ambiguous), Some(ErrorCategory::FormatError));
        assert_eq!(classify(&p, &answer(801.0)), None);
        assert!(is_correct(&p, &answer(801.004)));
    }

    #[test]
    fn test_arithmetic_slips() {
        let p = addition();
        // decimal shift
        assert_eq!(classify(&p, &answer(80.1)), Some(ErrorCategory::ComputationError));
        // digit slip
        assert_eq!(classify(&p, &answer(810.0)), Some(ErrorCategory::ComputationError));
        // wrong operation
        assert_eq!(classify(&p, &answer(333.0)), Some(ErrorCategory::ComputationError));
        assert_eq!(classify(&p, &answer(-801.0)), Some(ErrorCategory::ComputationError));
        // unrelated
        assert_eq!(classify(&p, &answer(12.5)), Some(ErrorCategory::ComprehensionError));
    }

    #[test]
    fn test_conversion_mistakes() {
        let p = Problem::build(
            "conv_001",
            Operation::TemperatureConversion,
            vec![
                Operand::Number(100.0),
                Operand::Unit("celsius".into()),
                Operand::Unit("fahrenheit".into()),
            ],
            DEFAULT_TOLERANCE,
        )
        .unwrap();
        assert_eq!(p.ground_truth, AnswerValue::Number(212.0));
        // offset omitted
        assert_eq!(classify(&p, &answer(180.0)), Some(ErrorCategory::ComputationError));
        // inverted
        assert!(is_computation_error(&p, &AnswerValue::Number(37.78)));
    }

    #[test]
    fn test_percentage_complement() {
        let p = Problem::build(
            "percent_001",
            Operation::Discount,
            vec![Operand::Number(240.0), Operand::Number(25.0)],
            DEFAULT_TOLERANCE,
        )
        .unwrap();
        assert_eq!(p.ground_truth, AnswerValue::Number(60.0));
        assert_eq!(classify(&p, &answer(180.0)), Some(ErrorCategory::ComputationError));
        assert_eq!(classify(&p, &answer(25.0)), Some(ErrorCategory::ComputationError));
    }

    #[test]
    fn test_reversed_ordering() {
        let p = Problem::build(
            "cmp_001",
            Operation::Ordering,
            vec![
                Operand::Fraction { numerator: 3, denominator: 4 },
                Operand::Number(0.7),
                Operand::Fraction { numerator: 5, denominator: 8 },
            ],
            DEFAULT_TOLERANCE,
        )
        .unwrap();
        let reversed = AnswerValue::Sequence(vec!["A".into(), "B".into(), "C".into()]);
        let scrambled = AnswerValue::Sequence(vec!["B".into(), "A".into(), "C".into()]);
        assert!(is_computation_error(&p, &reversed));
        assert!(!is_computation_error(&p, &scrambled));
    }

    #[test]
    fn test_tally() {
        let mut tally = ErrorTally::default();
        tally.add(ErrorCategory::Refusal);
        tally.add(ErrorCategory::Refusal);
        tally.add(ErrorCategory::ComputationError);
        assert_eq!(tally.get(ErrorCategory::Refusal), 2);
        assert_eq!(tally.total(), 3);
    }
}
