//! Numeric answer extraction from free-form model responses
//!
//! Responses are normalized (full-width characters, currency symbols, markdown
//! emphasis), scanned for numeric tokens, and disambiguated by looking for a
//! concluding phrase right before a candidate. A response with several distinct
//! unanchored numbers is reported as ambiguous instead of guessed at.

mod numbers;
mod ordering;

pub use numbers::{parse_number, scan_numbers, NumericToken};

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::problems::AnswerValue;

/// Phrases that introduce the final answer
const ANCHORS: &[&str] = &[
    "答案是", "答案為", "答案", "結果是", "結果為", "結果", "等於", "約為", "總共", "共", "為", "是",
    "=", "≈", "total", "result", "answer", "equals", "is",
];

/// Hedge words skipped between an anchor and its number
const HEDGES: &[&str] = &["大約", "大概", "約", "approximately", "about", "around", "roughly"];

/// Self-reported confidence tokens, recorded verbatim
const CONFIDENCE_TOKENS: &[&str] = &[
    "大約", "大概", "左右", "可能", "約", "確定", "approximately", "about", "roughly", "probably",
    "i think", "exactly",
];

const REFUSALS: &[&str] = &[
    "不確定", "不知道", "無法", "不能確定", "i don't know", "i do not know", "i'm not sure",
    "cannot determine", "can't determine", "unable to",
];

/// What shape of answer the caller expects
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedKind {
    Number,
    /// Labelled items to be ranked ascending
    Ordering {
        items: Vec<(String, f64)>,
        tolerance: f64,
    },
    /// The largest of the labelled items, answered by value or by label
    Maximum { items: Vec<(String, f64)> },
}

/// Outcome of extraction; callers must handle every case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Extraction {
    Ok { value: AnswerValue },
    Ambiguous { candidates: Vec<AnswerValue> },
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Ok,
    Ambiguous,
    NotFound,
}

impl Extraction {
    pub fn status(&self) -> ExtractionStatus {
        match self {
            Extraction::Ok { .. } => ExtractionStatus::Ok,
            Extraction::Ambiguous { .. } => ExtractionStatus::Ambiguous,
            Extraction::NotFound => ExtractionStatus::NotFound,
        }
    }

    pub fn value(&self) -> Option<&AnswerValue> {
        match self {
            Extraction::Ok { value } => Some(value),
            _ => None,
        }
    }
}

/// A parsed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedAnswer {
    pub extraction: Extraction,
    pub confidence_expressed: Option<String>,
}

impl ExtractedAnswer {
    pub fn not_found() -> Self {
        Self {
            extraction: Extraction::NotFound,
            confidence_expressed: None,
        }
    }

    pub fn status(&self) -> ExtractionStatus {
        self.extraction.status()
    }

    pub fn value(&self) -> Option<&AnswerValue> {
        self.extraction.value()
    }
}

/// Parse a response into a normalized answer
pub fn extract(response_text: &str, expected: &ExpectedKind) -> ExtractedAnswer {
    let text = normalize(response_text);
    if text.trim().is_empty() {
        return ExtractedAnswer::not_found();
    }

    let confidence_expressed = find_confidence(&text);
    let extraction = match expected {
        ExpectedKind::Number => extract_number(&text),
        ExpectedKind::Ordering { items, tolerance } => {
            ordering::extract_ordering(&text, items, *tolerance)
        }
        ExpectedKind::Maximum { items } => extract_maximum(&text, items),
    };

    ExtractedAnswer {
        extraction,
        confidence_expressed,
    }
}

fn extract_number(text: &str) -> Extraction {
    settle_numbers(text, &scan_numbers(text))
}

fn settle_numbers(text: &str, tokens: &[NumericToken]) -> Extraction {
    if let Some(anchored) = tokens
        .iter()
        .filter(|t| is_anchored(&text[..t.start]))
        .last()
    {
        return Extraction::Ok {
            value: AnswerValue::Number(anchored.value),
        };
    }

    if is_refusal(text) {
        return Extraction::NotFound;
    }

    let mut distinct: Vec<f64> = Vec::new();
    for token in tokens {
        if !distinct.iter().any(|v| *v == token.value) {
            distinct.push(token.value);
        }
    }

    match distinct.len() {
        0 => Extraction::NotFound,
        1 => Extraction::Ok {
            value: AnswerValue::Number(distinct[0]),
        },
        _ => Extraction::Ambiguous {
            candidates: distinct.into_iter().map(AnswerValue::Number).collect(),
        },
    }
}

/// A lone or anchored item label stands for its value. Otherwise numbers in a
/// clause that names an item are restated definitions and lose to the rest.
fn extract_maximum(text: &str, items: &[(String, f64)]) -> Extraction {
    let value_of = |label: &str| {
        items
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| Extraction::Ok {
                value: AnswerValue::Number(*v),
            })
    };

    let bare = text.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, '.' | '。' | '!' | '！' | ':' | '：' | '"' | '「' | '」' | '(' | ')' | '（' | '）')
    });
    if let Some(answer) = value_of(bare) {
        return answer;
    }

    let mentions = label_mentions(text, items);
    if let Some(answer) = mentions
        .iter()
        .filter(|(at, _)| is_anchored(&text[..*at]))
        .last()
        .and_then(|(_, label)| value_of(label))
    {
        return answer;
    }

    let tokens = scan_numbers(text);
    let answers: Vec<NumericToken> = tokens
        .iter()
        .filter(|t| {
            let clause_start = text[..t.start]
                .rfind(|c: char| CLAUSE_BREAKS.contains(&c))
                .map_or(0, |at| at + text[at..].chars().next().map_or(1, char::len_utf8));
            !mentions.iter().any(|(at, _)| *at >= clause_start && *at < t.start)
        })
        .cloned()
        .collect();

    if answers.is_empty() {
        settle_numbers(text, &tokens)
    } else {
        settle_numbers(text, &answers)
    }
}

const CLAUSE_BREAKS: &[char] = &['，', ',', '。', ';', '；', '、', '\n', '!', '！', '?', '？'];

/// Byte offsets of standalone item labels
fn label_mentions<'a>(text: &str, items: &'a [(String, f64)]) -> Vec<(usize, &'a str)> {
    let mut mentions = Vec::new();
    let mut prev: Option<char> = None;
    let mut chars = text.char_indices().peekable();
    while let Some((at, c)) = chars.next() {
        let next = chars.peek().map(|(_, n)| *n);
        let standalone = !prev.is_some_and(|p| p.is_ascii_alphanumeric())
            && !next.is_some_and(|n| n.is_ascii_alphanumeric());
        if c.is_ascii_uppercase() && standalone {
            if let Some((label, _)) = items.iter().find(|(l, _)| l.len() == 1 && l.starts_with(c)) {
                mentions.push((at, label.as_str()));
            }
        }
        prev = Some(c);
    }
    mentions
}

fn normalize(text: &str) -> String {
    static CURRENCY: OnceLock<Regex> = OnceLock::new();
    let currency = CURRENCY.get_or_init(|| Regex::new(r"(?:NT|US|HK)?\$|[¥€£￥元]").unwrap());

    let mapped: String = text
        .chars()
        .filter_map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32),
            '．' => Some('.'),
            '＝' => Some('='),
            '％' => Some('%'),
            '／' => Some('/'),
            '－' | '−' => Some('-'),
            '＜' => Some('<'),
            '＞' => Some('>'),
            '*' | '`' => None,
            other => Some(other),
        })
        .collect();

    currency.replace_all(&mapped, "").into_owned()
}

/// True when the text right before a number ends with a concluding phrase
fn is_anchored(prefix: &str) -> bool {
    let mut rest = prefix;
    loop {
        let trimmed = rest.trim_end_matches(|c: char| {
            c.is_whitespace() || matches!(c, ':' | '：' | '(' | '（' | '"' | '「' | '『')
        });
        if ends_with_anchor(trimmed) {
            return true;
        }
        let lower = trimmed.to_lowercase();
        match HEDGES.iter().find(|h| lower.ends_with(*h)) {
            Some(hedge)
                if trimmed.len() >= hedge.len()
                    && trimmed.is_char_boundary(trimmed.len() - hedge.len()) =>
            {
                rest = &trimmed[..trimmed.len() - hedge.len()];
            }
            _ => return false,
        }
    }
}

fn ends_with_anchor(text: &str) -> bool {
    let lower = text.to_lowercase();
    ANCHORS.iter().any(|anchor| {
        if !lower.ends_with(anchor) {
            return false;
        }
        if anchor.is_ascii() && anchor.chars().all(|c| c.is_ascii_alphabetic()) {
            let before = &lower[..lower.len() - anchor.len()];
            !before
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphabetic())
        } else {
            true
        }
    })
}

fn is_refusal(text: &str) -> bool {
    let lower = text.to_lowercase().replace('’', "'");
    REFUSALS.iter().any(|r| lower.contains(r))
}

fn find_confidence(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    CONFIDENCE_TOKENS
        .iter()
        .filter_map(|token| lower.find(token).map(|pos| (pos, *token)))
        .min_by_key(|(pos, token)| (*pos, std::cmp::Reverse(token.len())))
        .map(|(_, token)| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(text: &str) -> Extraction {
        extract(text, &ExpectedKind::Number).extraction
    }

    fn ok(v: f64) -> Extraction {
        Extraction::Ok {
            value: AnswerValue::Number(v),
        }
    }

    #[test]
    fn test_anchored_answers() {
        assert_eq!(number("答案是 801"), ok(801.0));
        assert_eq!(number("等於 801"), ok(801.0));
        assert_eq!(number("234 + 567 = 801"), ok(801.0));
        assert_eq!(number("What is 234 + 567? The answer is 801."), ok(801.0));
        assert_eq!(number("The total: $1,234.50"), ok(1234.5));
    }

    #[test]
    fn test_hedged_answer() {
        let answer = extract("大約 100 元左右", &ExpectedKind::Number);
        assert_eq!(answer.extraction, ok(100.0));
        assert_eq!(answer.confidence_expressed.as_deref(), Some("大約"));

        assert_eq!(number("答案是大約 42"), ok(42.0));
    }

    #[test]
    fn test_single_unanchored_number() {
        assert_eq!(number("小明現在有 801 元"), ok(801.0));
        assert_eq!(number("801"), ok(801.0));
        assert_eq!(number("**１２３**"), ok(123.0));
    }

    #[test]
    fn test_ambiguous_without_anchor() {
        match number("maybe 12 or 15") {
            Extraction::Ambiguous { candidates } => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguous, got {:?}", other),
        }
        // repeated identical numbers are not ambiguous
        assert_eq!(number("15 ... 15"), ok(15.0));
    }

    #[test]
    fn test_refusals() {
        assert_eq!(number("我不確定"), Extraction::NotFound);
        assert_eq!(number("I don't know, maybe 3 or 4"), Extraction::NotFound);
        assert_eq!(number(""), Extraction::NotFound);
        assert_eq!(number("   "), Extraction::NotFound);
        assert_eq!(number("no digits here"), Extraction::NotFound);
    }

    #[test]
    fn test_negative_and_percent() {
        assert_eq!(number("結果是 -333"), ok(-333.0));
        assert_eq!(number("折扣是 25%"), ok(25.0));
    }

    #[test]
    fn test_english_anchor_needs_word_boundary() {
        assert!(!ends_with_anchor("this"));
        assert!(ends_with_anchor("the answer is"));
        assert!(ends_with_anchor("答案是"));
    }

    #[test]
    fn test_canonical_strings_are_exact() {
        for v in [0.0, 801.0, 12.5, -3.25, 1234.5, 0.1 + 0.2, 1e15] {
            assert_eq!(number(&format!("{}", v)), ok(v));
        }
    }

    fn maximum(text: &str) -> Extraction {
        let items = vec![
            ("A".to_string(), 0.75),
            ("B".to_string(), 0.7),
            ("C".to_string(), 0.625),
        ];
        extract(text, &ExpectedKind::Maximum { items }).extraction
    }

    #[test]
    fn test_maximum_by_label() {
        assert_eq!(maximum("A"), ok(0.75));
        assert_eq!(maximum("B。"), ok(0.7));
        assert_eq!(maximum("最大的是 A"), ok(0.75));
        assert_eq!(maximum("The answer is C"), ok(0.625));
    }

    #[test]
    fn test_maximum_ignores_restated_items() {
        assert_eq!(maximum("最大的是 A（3/4 = 0.75），B = 0.7 比較小。"), ok(0.75));
        assert_eq!(maximum("最大的是 0.75（A），B = 0.7 比較小"), ok(0.75));
        assert_eq!(maximum("答案是 0.75"), ok(0.75));
        assert_eq!(maximum("A：3/4"), ok(0.75));
        assert_eq!(maximum("我不知道"), Extraction::NotFound);
    }
}
