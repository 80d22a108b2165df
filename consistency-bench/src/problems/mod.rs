//! Problem definitions, paraphrases and generation

pub mod conversion;
pub mod corpus;
pub mod generator;
pub mod paraphrase;

pub use corpus::{load_corpus, parse_corpus, save_corpus, serialize_corpus, CorpusError};
pub use generator::{generate, GenerationError, QuestionGenerator, SamplingRanges};
pub use paraphrase::create_paraphrases;

use serde::{Deserialize, Serialize};

use crate::extraction::ExpectedKind;

/// Absolute epsilon used when no override is configured
pub const DEFAULT_TOLERANCE: f64 = 0.01;

/// Problem categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Arithmetic,
    Percentage,
    Conversion,
    Comparison,
}

impl Category {
    pub fn all() -> Vec<Category> {
        vec![
            Category::Arithmetic,
            Category::Percentage,
            Category::Conversion,
            Category::Comparison,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Arithmetic => "arithmetic",
            Category::Percentage => "percentage",
            Category::Conversion => "conversion",
            Category::Comparison => "comparison",
        }
    }

    /// Prefix used for problem ids (`arith_001`, `cmp_004`, ...)
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Category::Arithmetic => "arith",
            Category::Percentage => "percent",
            Category::Conversion => "conv",
            Category::Comparison => "cmp",
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "arithmetic" | "arith" => Ok(Category::Arithmetic),
            "percentage" | "percent" => Ok(Category::Percentage),
            "conversion" | "conv" => Ok(Category::Conversion),
            "comparison" | "cmp" => Ok(Category::Comparison),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The concrete operation a problem asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Addition,
    Subtraction,
    Multiplication,
    Division,
    PercentOf,
    Discount,
    Interest,
    LengthConversion,
    WeightConversion,
    TimeConversion,
    TemperatureConversion,
    Ordering,
    Maximum,
}

impl Operation {
    pub fn category(&self) -> Category {
        match self {
            Operation::Addition
            | Operation::Subtraction
            | Operation::Multiplication
            | Operation::Division => Category::Arithmetic,
            Operation::PercentOf | Operation::Discount | Operation::Interest => {
                Category::Percentage
            }
            Operation::LengthConversion
            | Operation::WeightConversion
            | Operation::TimeConversion
            | Operation::TemperatureConversion => Category::Conversion,
            Operation::Ordering | Operation::Maximum => Category::Comparison,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Addition => "addition",
            Operation::Subtraction => "subtraction",
            Operation::Multiplication => "multiplication",
            Operation::Division => "division",
            Operation::PercentOf => "percent_of",
            Operation::Discount => "discount",
            Operation::Interest => "interest",
            Operation::LengthConversion => "length_conversion",
            Operation::WeightConversion => "weight_conversion",
            Operation::TimeConversion => "time_conversion",
            Operation::TemperatureConversion => "temperature_conversion",
            Operation::Ordering => "ordering",
            Operation::Maximum => "maximum",
        }
    }

    /// Apply a binary arithmetic operation, `None` for non-arithmetic operations
    /// or division by zero
    pub fn apply_arithmetic(&self, a: f64, b: f64) -> Option<f64> {
        match self {
            Operation::Addition => Some(a + b),
            Operation::Subtraction => Some(a - b),
            Operation::Multiplication => Some(a * b),
            Operation::Division if b != 0.0 => Some(a / b),
            _ => None,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single input to a problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Number(f64),
    Fraction { numerator: i64, denominator: i64 },
    /// Unit code from the conversion table (`km`, `lb`, `celsius`, ...)
    Unit(String),
}

impl Operand {
    /// Numeric value, `None` for categorical operands
    pub fn value(&self) -> Option<f64> {
        match self {
            Operand::Number(v) => Some(*v),
            Operand::Fraction {
                numerator,
                denominator,
            } if *denominator != 0 => Some(*numerator as f64 / *denominator as f64),
            _ => None,
        }
    }

    /// Text used when substituting the operand into a paraphrase template
    pub fn display(&self) -> String {
        match self {
            Operand::Number(v) => format!("{}", v),
            Operand::Fraction {
                numerator,
                denominator,
            } => format!("{}/{}", numerator, denominator),
            Operand::Unit(code) => conversion::unit_name(code).to_string(),
        }
    }
}

/// A ground truth or extracted answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Number(f64),
    /// Item labels in ascending order
    Sequence(Vec<String>),
}

impl AnswerValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AnswerValue::Number(v) => Some(*v),
            AnswerValue::Sequence(_) => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[String]> {
        match self {
            AnswerValue::Sequence(s) => Some(s),
            AnswerValue::Number(_) => None,
        }
    }

    /// Numbers match within `tolerance`; sequences must match exactly
    pub fn matches(&self, other: &AnswerValue, tolerance: f64) -> bool {
        match (self, other) {
            (AnswerValue::Number(a), AnswerValue::Number(b)) => (a - b).abs() <= tolerance,
            (AnswerValue::Sequence(a), AnswerValue::Sequence(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnswerValue::Number(v) => write!(f, "{}", v),
            AnswerValue::Sequence(s) => write!(f, "{}", s.join(" < ")),
        }
    }
}

/// Whether the ground truth is exact or rounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultKind {
    Exact,
    Rounded { decimals: u32 },
}

/// Paraphrase variant identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantKey {
    Direct,
    Contextualized,
    Variation,
}

impl VariantKey {
    pub fn all() -> [VariantKey; 3] {
        [
            VariantKey::Direct,
            VariantKey::Contextualized,
            VariantKey::Variation,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VariantKey::Direct => "direct",
            VariantKey::Contextualized => "contextualized",
            VariantKey::Variation => "variation",
        }
    }
}

impl std::fmt::Display for VariantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The three wordings of one problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParaphraseSet {
    pub direct: String,
    pub contextualized: String,
    pub variation: String,
}

impl ParaphraseSet {
    pub fn get(&self, key: VariantKey) -> &str {
        match key {
            VariantKey::Direct => &self.direct,
            VariantKey::Contextualized => &self.contextualized,
            VariantKey::Variation => &self.variation,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (VariantKey, &str)> {
        VariantKey::all().into_iter().map(move |k| (k, self.get(k)))
    }
}

/// A generated problem with its ground truth and paraphrases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub category: Category,
    pub operation: Operation,
    pub operands: Vec<Operand>,
    pub ground_truth: AnswerValue,
    pub tolerance: f64,
    pub result_kind: ResultKind,
    pub paraphrases: ParaphraseSet,
}

impl Problem {
    /// Build a problem from its operands, computing ground truth and paraphrases
    pub fn build(
        id: impl Into<String>,
        operation: Operation,
        operands: Vec<Operand>,
        tolerance: f64,
    ) -> Option<Self> {
        let ground_truth = solve_operation(operation, &operands)?;
        let result_kind = result_kind_for(operation, &operands);
        let mut problem = Self {
            id: id.into(),
            category: operation.category(),
            operation,
            operands,
            ground_truth,
            tolerance,
            result_kind,
            paraphrases: ParaphraseSet {
                direct: String::new(),
                contextualized: String::new(),
                variation: String::new(),
            },
        };
        problem.paraphrases = create_paraphrases(&problem);
        Some(problem)
    }

    /// Recompute the ground truth from operands
    pub fn solve(&self) -> Option<AnswerValue> {
        solve_operation(self.operation, &self.operands)
    }

    /// Labelled items of a comparison problem (`A`, `B`, ...)
    pub fn items(&self) -> Vec<(String, f64)> {
        if self.category != Category::Comparison {
            return Vec::new();
        }
        self.operands
            .iter()
            .enumerate()
            .filter_map(|(i, op)| op.value().map(|v| (item_label(i), v)))
            .collect()
    }

    /// What the extractor should look for in a response
    pub fn expected_kind(&self) -> ExpectedKind {
        match self.operation {
            Operation::Ordering => ExpectedKind::Ordering {
                items: self.items(),
                tolerance: self.tolerance,
            },
            Operation::Maximum => ExpectedKind::Maximum {
                items: self.items(),
            },
            _ => ExpectedKind::Number,
        }
    }

    /// Numeric operand values, in order
    pub fn numeric_operands(&self) -> Vec<f64> {
        self.operands.iter().filter_map(Operand::value).collect()
    }
}

/// Label for the `index`-th comparison item
pub fn item_label(index: usize) -> String {
    char::from(b'A' + (index % 26) as u8).to_string()
}

/// Round to two decimals, the precision every numeric ground truth uses
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn numbers(operands: &[Operand]) -> Vec<f64> {
    operands.iter().filter_map(Operand::value).collect()
}

fn solve_operation(operation: Operation, operands: &[Operand]) -> Option<AnswerValue> {
    match operation.category() {
        Category::Arithmetic => {
            let nums = numbers(operands);
            let (a, b) = (*nums.first()?, *nums.get(1)?);
            operation.apply_arithmetic(a, b).map(|v| AnswerValue::Number(round2(v)))
        }
        Category::Percentage => {
            let nums = numbers(operands);
            let (base, rate) = (*nums.first()?, *nums.get(1)?);
            Some(AnswerValue::Number(round2(base * rate / 100.0)))
        }
        Category::Conversion => {
            let value = operands.first()?.value()?;
            let (from, to) = match (operands.get(1)?, operands.get(2)?) {
                (Operand::Unit(from), Operand::Unit(to)) => (from, to),
                _ => return None,
            };
            let rule = conversion::lookup(from, to)?;
            if rule.dimension.operation() != operation {
                return None;
            }
            Some(AnswerValue::Number(round2(rule.apply(value))))
        }
        Category::Comparison => {
            let values = numbers(operands);
            if values.len() < 2 || values.len() != operands.len() {
                return None;
            }
            match operation {
                Operation::Maximum => values
                    .iter()
                    .copied()
                    .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
                    .map(AnswerValue::Number),
                _ => {
                    let mut indexed: Vec<(usize, f64)> = values.into_iter().enumerate().collect();
                    indexed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
                    Some(AnswerValue::Sequence(
                        indexed.into_iter().map(|(i, _)| item_label(i)).collect(),
                    ))
                }
            }
        }
    }
}

fn result_kind_for(operation: Operation, operands: &[Operand]) -> ResultKind {
    if operation != Operation::Division {
        return ResultKind::Exact;
    }
    let nums = numbers(operands);
    match (nums.first(), nums.get(1)) {
        (Some(&a), Some(&b)) if b != 0.0 => {
            let q = a / b;
            if (round2(q) - q).abs() < 1e-9 {
                ResultKind::Exact
            } else {
                ResultKind::Rounded { decimals: 2 }
            }
        }
        _ => ResultKind::Exact,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_addition() {
        let p = Problem::build(
            "arith_001",
            Operation::Addition,
            vec![Operand::Number(234.0), Operand::Number(567.0)],
            DEFAULT_TOLERANCE,
        )
        .unwrap();
        assert_eq!(p.ground_truth, AnswerValue::Number(801.0));
        assert_eq!(p.category, Category::Arithmetic);
        assert_eq!(p.result_kind, ResultKind::Exact);
    }

    #[test]
    fn test_division_result_kind() {
        let exact = Problem::build(
            "arith_002",
            Operation::Division,
            vec![Operand::Number(120.0), Operand::Number(8.0)],
            DEFAULT_TOLERANCE,
        )
        .unwrap();
        assert_eq!(exact.result_kind, ResultKind::Exact);
        assert_eq!(exact.ground_truth, AnswerValue::Number(15.0));

        let rounded = Problem::build(
            "arith_003",
            Operation::Division,
            vec![Operand::Number(100.0), Operand::Number(3.0)],
            DEFAULT_TOLERANCE,
        )
        .unwrap();
        assert_eq!(rounded.result_kind, ResultKind::Rounded { decimals: 2 });
        assert_eq!(rounded.ground_truth, AnswerValue::Number(33.33));
    }

    #[test]
    fn test_ordering_ground_truth() {
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
        assert_eq!(
            p.ground_truth,
            AnswerValue::Sequence(vec!["C".into(), "B".into(), "A".into()])
        );
        assert_eq!(p.items().len(), 3);
    }

    #[test]
    fn test_answer_matches() {
        let a = AnswerValue::Number(100.0);
        assert!(a.matches(&AnswerValue::Number(100.005), 0.01));
        assert!(!a.matches(&AnswerValue::Number(100.5), 0.01));
        assert!(!a.matches(&AnswerValue::Sequence(vec!["A".into()]), 0.01));
    }

    #[test]
    fn test_category_from_str() {
        assert_eq!("Percent".parse::<Category>().unwrap(), Category::Percentage);
        assert!("geometry".parse::<Category>().is_err());
    }
}
