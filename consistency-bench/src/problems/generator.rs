//! Deterministic question generation

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::{conversion, round2, Category, Operand, Operation, Problem, DEFAULT_TOLERANCE};

/// Resampling attempts before a comparison set is declared unsatisfiable
const MAX_COMPARISON_ATTEMPTS: u32 = 64;

const FRACTION_DENOMINATORS: &[i64] = &[2, 3, 4, 5, 8, 10];

/// Error type for problem generation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("Invalid sampling range for {name}: {detail}")]
    InvalidRange { name: &'static str, detail: String },

    #[error("Could not satisfy {category} constraints after {attempts} attempts")]
    Unsatisfiable { category: Category, attempts: u32 },

    #[error("Requested zero problems")]
    ZeroCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DigitBucket {
    TwoDigit,
    ThreeDigit,
    Decimal,
}

const BUCKETS: [DigitBucket; 3] = [
    DigitBucket::TwoDigit,
    DigitBucket::ThreeDigit,
    DigitBucket::Decimal,
];

const ARITHMETIC_OPS: [Operation; 4] = [
    Operation::Addition,
    Operation::Subtraction,
    Operation::Multiplication,
    Operation::Division,
];

const PERCENTAGE_OPS: [Operation; 3] = [
    Operation::PercentOf,
    Operation::Discount,
    Operation::Interest,
];

/// Bounded ranges operands are drawn from
#[derive(Debug, Clone)]
pub struct SamplingRanges {
    /// Inclusive integer range for percentage base values
    pub percentage_base: (i64, i64),
    pub percentage_rates: Vec<u32>,
    /// Inclusive integer range for values to convert
    pub conversion_value: (i64, i64),
    /// Closed range for comparison item values
    pub comparison_value: (f64, f64),
    /// Inclusive range for the number of comparison items
    pub comparison_items: (usize, usize),
}

impl Default for SamplingRanges {
    fn default() -> Self {
        Self {
            percentage_base: (100, 1000),
            percentage_rates: vec![5, 10, 15, 20, 25, 30, 40, 50, 75],
            conversion_value: (1, 500),
            comparison_value: (0.1, 3.0),
            comparison_items: (2, 4),
        }
    }
}

impl SamplingRanges {
    fn validate(&self) -> Result<(), GenerationError> {
        let (lo, hi) = self.percentage_base;
        if lo > hi || lo <= 0 {
            return Err(GenerationError::InvalidRange {
                name: "percentage_base",
                detail: format!("{}..={}", lo, hi),
            });
        }
        if self.percentage_rates.is_empty() {
            return Err(GenerationError::InvalidRange {
                name: "percentage_rates",
                detail: "empty".to_string(),
            });
        }
        let (lo, hi) = self.conversion_value;
        if lo > hi || lo <= 0 {
            return Err(GenerationError::InvalidRange {
                name: "conversion_value",
                detail: format!("{}..={}", lo, hi),
            });
        }
        let (lo, hi) = self.comparison_value;
        if !(lo.is_finite() && hi.is_finite()) || lo >= hi || lo <= 0.0 {
            return Err(GenerationError::InvalidRange {
                name: "comparison_value",
                detail: format!("{}..={}", lo, hi),
            });
        }
        let (lo, hi) = self.comparison_items;
        if lo < 2 || lo > hi || hi > 26 {
            return Err(GenerationError::InvalidRange {
                name: "comparison_items",
                detail: format!("{}..={}", lo, hi),
            });
        }
        Ok(())
    }
}

/// Generates problems for each category from a seed
#[derive(Debug, Clone, Default)]
pub struct QuestionGenerator {
    ranges: SamplingRanges,
    tolerances: HashMap<Category, f64>,
}

impl QuestionGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ranges(mut self, ranges: SamplingRanges) -> Self {
        self.ranges = ranges;
        self
    }

    /// Override the equality epsilon for one category
    pub fn with_tolerance(mut self, category: Category, tolerance: f64) -> Self {
        self.tolerances.insert(category, tolerance);
        self
    }

    pub fn tolerance(&self, category: Category) -> f64 {
        self.tolerances
            .get(&category)
            .copied()
            .unwrap_or(DEFAULT_TOLERANCE)
    }

    /// Generate `count` problems of one category; identical seeds give identical output
    pub fn generate(
        &self,
        category: Category,
        count: usize,
        seed: u64,
    ) -> Result<Vec<Problem>, GenerationError> {
        if count == 0 {
            return Err(GenerationError::ZeroCount);
        }
        self.ranges.validate()?;

        let mut rng = StdRng::seed_from_u64(seed);
        let tolerance = self.tolerance(category);
        let mut problems = Vec::with_capacity(count);

        for i in 0..count {
            let id = format!("{}_{:03}", category.id_prefix(), i + 1);
            let (operation, operands) = match category {
                Category::Arithmetic => sample_arithmetic(&mut rng),
                Category::Percentage => self.sample_percentage(&mut rng),
                Category::Conversion => self.sample_conversion(&mut rng),
                Category::Comparison => self.sample_comparison(&mut rng, tolerance)?,
            };
            let problem = Problem::build(id, operation, operands, tolerance).ok_or(
                GenerationError::Unsatisfiable {
                    category,
                    attempts: 1,
                },
            )?;
            problems.push(problem);
        }

        tracing::debug!("Generated {} {} problems (seed {})", count, category, seed);
        Ok(problems)
    }

    /// Generate several categories at once, deriving a per-category seed from `seed`
    pub fn generate_corpus(
        &self,
        counts: &[(Category, usize)],
        seed: u64,
    ) -> Result<Vec<Problem>, GenerationError> {
        let mut problems = Vec::new();
        for &(category, count) in counts {
            if count == 0 {
                continue;
            }
            let category_seed = seed.wrapping_add(category as u64 * 1_000_003);
            problems.extend(self.generate(category, count, category_seed)?);
        }
        Ok(problems)
    }

    fn sample_percentage(&self, rng: &mut StdRng) -> (Operation, Vec<Operand>) {
        let operation = *PERCENTAGE_OPS.choose(rng).unwrap_or(&Operation::PercentOf);
        let (lo, hi) = self.ranges.percentage_base;
        let base = rng.gen_range(lo..=hi);
        let rate = *self.ranges.percentage_rates.choose(rng).unwrap_or(&10);
        (
            operation,
            vec![Operand::Number(base as f64), Operand::Number(rate as f64)],
        )
    }

    fn sample_conversion(&self, rng: &mut StdRng) -> (Operation, Vec<Operand>) {
        let rule = conversion::CONVERSIONS
            .choose(rng)
            .unwrap_or(&conversion::CONVERSIONS[0]);
        let (lo, hi) = self.ranges.conversion_value;
        let value = if rng.gen_bool(0.5) {
            rng.gen_range(lo..=hi) as f64
        } else {
            round1(rng.gen_range(lo as f64..=hi as f64))
        };
        (
            rule.dimension.operation(),
            vec![
                Operand::Number(value),
                Operand::Unit(rule.from.to_string()),
                Operand::Unit(rule.to.to_string()),
            ],
        )
    }

    fn sample_comparison(
        &self,
        rng: &mut StdRng,
        tolerance: f64,
    ) -> Result<(Operation, Vec<Operand>), GenerationError> {
        let operation = if rng.gen_bool(0.5) {
            Operation::Ordering
        } else {
            Operation::Maximum
        };
        let (min_items, max_items) = self.ranges.comparison_items;
        let n = rng.gen_range(min_items..=max_items);

        for _ in 0..MAX_COMPARISON_ATTEMPTS {
            let operands: Vec<Operand> = (0..n).map(|_| self.sample_comparison_item(rng)).collect();
            let values: Vec<f64> = operands.iter().filter_map(Operand::value).collect();
            if well_separated(&values, tolerance) {
                return Ok((operation, operands));
            }
        }

        Err(GenerationError::Unsatisfiable {
            category: Category::Comparison,
            attempts: MAX_COMPARISON_ATTEMPTS,
        })
    }

    fn sample_comparison_item(&self, rng: &mut StdRng) -> Operand {
        let (lo, hi) = self.ranges.comparison_value;
        if rng.gen_bool(0.5) {
            let denominator = *FRACTION_DENOMINATORS.choose(rng).unwrap_or(&4);
            let min_num = (lo * denominator as f64).ceil() as i64;
            let max_num = (hi * denominator as f64).floor() as i64;
            if min_num <= max_num && min_num > 0 {
                return Operand::Fraction {
                    numerator: rng.gen_range(min_num..=max_num),
                    denominator,
                };
            }
        }
        Operand::Number(round2(rng.gen_range(lo..=hi)).clamp(lo, hi))
    }
}

fn sample_arithmetic(rng: &mut StdRng) -> (Operation, Vec<Operand>) {
    let bucket = *BUCKETS.choose(rng).unwrap_or(&DigitBucket::TwoDigit);
    let operation = *ARITHMETIC_OPS.choose(rng).unwrap_or(&Operation::Addition);

    let (a, b) = match (operation, bucket) {
        (Operation::Multiplication, DigitBucket::TwoDigit) => {
            (rng.gen_range(10..=99) as f64, rng.gen_range(10..=99) as f64)
        }
        (Operation::Multiplication, DigitBucket::ThreeDigit) => {
            (rng.gen_range(100..=999) as f64, rng.gen_range(2..=9) as f64)
        }
        (Operation::Multiplication, DigitBucket::Decimal) => {
            (decimal_operand(rng), rng.gen_range(2..=20) as f64)
        }
        (Operation::Division, DigitBucket::TwoDigit) => {
            let divisor = rng.gen_range(2..=20);
            let quotient = rng.gen_range(10..=50);
            ((divisor * quotient) as f64, divisor as f64)
        }
        (Operation::Division, DigitBucket::ThreeDigit) => {
            (rng.gen_range(100..=999) as f64, rng.gen_range(3..=15) as f64)
        }
        (Operation::Division, DigitBucket::Decimal) => {
            (decimal_operand(rng), rng.gen_range(2..=9) as f64)
        }
        (_, DigitBucket::TwoDigit) => {
            (rng.gen_range(10..=99) as f64, rng.gen_range(10..=99) as f64)
        }
        (_, DigitBucket::ThreeDigit) => {
            (rng.gen_range(100..=999) as f64, rng.gen_range(100..=999) as f64)
        }
        (_, DigitBucket::Decimal) => (decimal_operand(rng), decimal_operand(rng)),
    };

    // Subtraction results stay non-negative
    let (a, b) = if operation == Operation::Subtraction && a < b {
        (b, a)
    } else {
        (a, b)
    };

    (operation, vec![Operand::Number(a), Operand::Number(b)])
}

/// One decimal place in [10, 100)
fn decimal_operand(rng: &mut StdRng) -> f64 {
    rng.gen_range(100..1000) as f64 / 10.0
}

/// No two values lie within `tolerance` of each other
pub fn well_separated(values: &[f64], tolerance: f64) -> bool {
    values.iter().enumerate().all(|(i, a)| {
        values[i + 1..]
            .iter()
            .all(|b| (a - b).abs() > tolerance)
    })
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Generate with default ranges and tolerances
pub fn generate(category: Category, count: usize, seed: u64) -> Result<Vec<Problem>, GenerationError> {
    QuestionGenerator::new().generate(category, count, seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_given_seed() {
        for category in Category::all() {
            let a = generate(category, 12, 7).unwrap();
            let b = generate(category, 12, 7).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = generate(Category::Arithmetic, 10, 1).unwrap();
        let b = generate(Category::Arithmetic, 10, 2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_ids_and_categories() {
        let problems = generate(Category::Percentage, 3, 42).unwrap();
        let ids: Vec<_> = problems.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["percent_001", "percent_002", "percent_003"]);
        assert!(problems.iter().all(|p| p.category == Category::Percentage));
    }

    #[test]
    fn test_percentage_ground_truth() {
        for p in generate(Category::Percentage, 20, 3).unwrap() {
            let nums = p.numeric_operands();
            let expected = round2(nums[0] * nums[1] / 100.0);
            assert_eq!(p.ground_truth.as_number(), Some(expected));
        }
    }

    #[test]
    fn test_subtraction_non_negative() {
        for p in generate(Category::Arithmetic, 200, 11).unwrap() {
            if p.operation == Operation::Subtraction {
                assert!(p.ground_truth.as_number().unwrap() >= 0.0);
            }
        }
    }

    #[test]
    fn test_arithmetic_operand_ranges() {
        for p in generate(Category::Arithmetic, 300, 5).unwrap() {
            let nums = p.numeric_operands();
            for v in &nums {
                if v.fract() != 0.0 {
                    assert!((10.0..100.0).contains(v), "{}: {}", p.id, v);
                    assert!(((v * 10.0).round() - v * 10.0).abs() < 1e-9, "{}: {}", p.id, v);
                }
            }
            if p.operation == Operation::Multiplication && nums.iter().all(|v| *v >= 10.0) {
                assert!(nums.iter().all(|v| *v < 100.0), "{}: {:?}", p.id, nums);
            }
        }
    }

    #[test]
    fn test_comparison_unsatisfiable() {
        let ranges = SamplingRanges {
            comparison_value: (1.0, 1.02),
            comparison_items: (4, 4),
            ..SamplingRanges::default()
        };
        let result = QuestionGenerator::new()
            .with_ranges(ranges)
            .generate(Category::Comparison, 1, 5);
        assert!(matches!(
            result,
            Err(GenerationError::Unsatisfiable {
                category: Category::Comparison,
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_range_rejected() {
        let ranges = SamplingRanges {
            percentage_base: (500, 100),
            ..SamplingRanges::default()
        };
        let result = QuestionGenerator::new()
            .with_ranges(ranges)
            .generate(Category::Percentage, 1, 5);
        assert!(matches!(result, Err(GenerationError::InvalidRange { .. })));
    }

    #[test]
    fn test_zero_count() {
        assert_eq!(generate(Category::Arithmetic, 0, 1), Err(GenerationError::ZeroCount));
    }

    #[test]
    fn test_tolerance_override() {
        let problems = QuestionGenerator::new()
            .with_tolerance(Category::Conversion, 0.5)
            .generate(Category::Conversion, 2, 9)
            .unwrap();
        assert!(problems.iter().all(|p| p.tolerance == 0.5));
    }

    #[test]
    fn test_corpus_covers_categories() {
        let counts = [(Category::Arithmetic, 2), (Category::Comparison, 3)];
        let corpus = QuestionGenerator::new().generate_corpus(&counts, 42).unwrap();
        assert_eq!(corpus.len(), 5);
        assert_eq!(corpus[4].id, "cmp_003");
    }
}
