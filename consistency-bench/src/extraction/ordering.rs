//! Ordering answers for comparison problems

use std::sync::OnceLock;

use regex::Regex;

use super::numbers::{scan_numbers, NumericToken};
use super::{is_refusal, Extraction};
use crate::problems::AnswerValue;

const DESCENDING_HINTS: &[&str] = &["由大到小", "從大到小", "由多到少", "由長到短", "descending", "largest to smallest"];

const ORDERING_CUES: &[&str] = &[
    "由小到大",
    "從小到大",
    "由大到小",
    "從大到小",
    "排序",
    "順序",
    "ascending",
    "descending",
    "in order",
];

fn label_chain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Z](?:\s*(?:<=|>=|<|>|,|，|、|→|->)\s*[A-Z])+").unwrap())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Ascending,
    Descending,
    Unstated,
}

pub(super) fn extract_ordering(text: &str, items: &[(String, f64)], tolerance: f64) -> Extraction {
    let descending_hint = DESCENDING_HINTS.iter().any(|h| text.to_lowercase().contains(h));

    let chains = label_chains(text, items, descending_hint);
    if let Some(result) = settle(chains) {
        return result;
    }

    let chains = numeric_chains(text, items, tolerance);
    if let Some(result) = settle(chains) {
        return result;
    }

    if is_refusal(text) {
        return Extraction::NotFound;
    }

    match mentions_in_order(text, items, tolerance) {
        Some(mut labels) => {
            if descending_hint {
                labels.reverse();
            }
            Extraction::Ok {
                value: AnswerValue::Sequence(labels),
            }
        }
        None => Extraction::NotFound,
    }
}

/// One complete chain is an answer; several different ones are ambiguous
fn settle(chains: Vec<Vec<String>>) -> Option<Extraction> {
    let mut distinct: Vec<Vec<String>> = Vec::new();
    for chain in chains {
        if !distinct.contains(&chain) {
            distinct.push(chain);
        }
    }
    match distinct.len() {
        0 => None,
        1 => distinct.pop().map(|labels| Extraction::Ok {
            value: AnswerValue::Sequence(labels),
        }),
        _ => Some(Extraction::Ambiguous {
            candidates: distinct.into_iter().map(AnswerValue::Sequence).collect(),
        }),
    }
}

fn is_complete(labels: &[String], items: &[(String, f64)]) -> bool {
    labels.len() == items.len() && items.iter().all(|(label, _)| labels.iter().filter(|l| *l == label).count() == 1)
}

fn direction_of(separators: &[&str]) -> Option<Direction> {
    let less = separators.iter().any(|s| s.starts_with('<'));
    let greater = separators.iter().any(|s| s.starts_with('>') && *s != "->");
    match (less, greater) {
        (true, true) => None,
        (true, false) => Some(Direction::Ascending),
        (false, true) => Some(Direction::Descending),
        (false, false) => Some(Direction::Unstated),
    }
}

fn orient(mut labels: Vec<String>, direction: Direction, descending_hint: bool) -> Vec<String> {
    if direction == Direction::Descending || (direction == Direction::Unstated && descending_hint) {
        labels.reverse();
    }
    labels
}

fn label_chains(text: &str, items: &[(String, f64)], descending_hint: bool) -> Vec<Vec<String>> {
    let mut chains = Vec::new();

    for m in label_chain_regex().find_iter(text) {
        let before = text[..m.start()].chars().next_back();
        let after = text[m.end()..].chars().next();
        if before.is_some_and(|c| c.is_ascii_alphabetic()) || after.is_some_and(|c| c.is_ascii_alphabetic()) {
            continue;
        }

        let chain = m.as_str();
        let labels: Vec<String> = chain
            .chars()
            .filter(|c| c.is_ascii_uppercase())
            .map(|c| c.to_string())
            .collect();
        let separators: Vec<&str> = chain
            .split(|c: char| c.is_ascii_uppercase())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let Some(direction) = direction_of(&separators) else { continue };
        if is_complete(&labels, items) {
            chains.push(orient(labels, direction, descending_hint));
        }
    }

    chains
}

fn label_for(value: f64, items: &[(String, f64)], tolerance: f64) -> Option<String> {
    items
        .iter()
        .filter(|(_, v)| (v - value).abs() <= tolerance)
        .min_by(|a, b| {
            (a.1 - value)
                .abs()
                .partial_cmp(&(b.1 - value).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(label, _)| label.clone())
}

/// Numbers joined by `<` or `>` that cover every item
fn numeric_chains(text: &str, items: &[(String, f64)], tolerance: f64) -> Vec<Vec<String>> {
    let tokens = scan_numbers(text);
    let mut chains = Vec::new();
    let mut current: Vec<&NumericToken> = Vec::new();
    let mut separators: Vec<&str> = Vec::new();

    let mut flush = |current: &mut Vec<&NumericToken>, separators: &mut Vec<&str>| {
        if current.len() >= 2 {
            if let Some(direction) = direction_of(separators) {
                let labels: Option<Vec<String>> = current
                    .iter()
                    .map(|t| label_for(t.value, items, tolerance))
                    .collect();
                if let Some(labels) = labels {
                    if is_complete(&labels, items) {
                        chains.push(orient(labels, direction, false));
                    }
                }
            }
        }
        current.clear();
        separators.clear();
    };

    for token in &tokens {
        if let Some(prev) = current.last() {
            let between = text[prev.end..token.start].trim();
            if matches!(between, "<" | ">" | "<=" | ">=") {
                separators.push(between);
                current.push(token);
                continue;
            }
            flush(&mut current, &mut separators);
        }
        current.push(token);
    }
    flush(&mut current, &mut separators);

    chains
}

/// Labels named by the mentioned values, preferring the text after the last
/// ordering cue, then the last run that covers every item once, then first mentions
fn mentions_in_order(text: &str, items: &[(String, f64)], tolerance: f64) -> Option<Vec<String>> {
    if items.is_empty() {
        return None;
    }
    let lowered = text.to_lowercase();
    let cue_end = ORDERING_CUES
        .iter()
        .filter_map(|cue| lowered.rfind(cue).map(|at| at + cue.len()))
        .max();
    if let Some(cue_end) = cue_end {
        if let Some(after) = lowered.get(cue_end..) {
            let labels = first_mentions(&mentioned_labels(after, items, tolerance));
            if is_complete(&labels, items) {
                return Some(labels);
            }
        }
    }

    let mentioned = mentioned_labels(text, items, tolerance);
    if let Some(run) = mentioned
        .windows(items.len())
        .rev()
        .find(|window| is_complete(window, items))
    {
        return Some(run.to_vec());
    }

    let labels = first_mentions(&mentioned);
    is_complete(&labels, items).then_some(labels)
}

fn mentioned_labels(text: &str, items: &[(String, f64)], tolerance: f64) -> Vec<String> {
    scan_numbers(text)
        .iter()
        .filter_map(|token| label_for(token.value, items, tolerance))
        .collect()
}

fn first_mentions(mentioned: &[String]) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for label in mentioned {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }
    labels
}
