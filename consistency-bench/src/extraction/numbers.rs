//! Numeric token scanning with locale-aware separators

use std::sync::OnceLock;

use regex::Regex;

/// A number found in text
#[derive(Debug, Clone, PartialEq)]
pub struct NumericToken {
    pub value: f64,
    /// Byte offset of the first character, including a leading sign
    pub start: usize,
    pub end: usize,
    pub is_fraction: bool,
    pub is_percent: bool,
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?P<frac>[0-9]+/[0-9]+)|(?P<num>[0-9]+(?:[.,][0-9]+)*)(?P<pct>\s*%)?").unwrap()
    })
}

/// Find every parseable number in `text`, in order
pub fn scan_numbers(text: &str) -> Vec<NumericToken> {
    let mut tokens = Vec::new();

    for caps in number_regex().captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };

        let (value, is_fraction) = if let Some(frac) = caps.name("frac") {
            match parse_fraction(frac.as_str()) {
                Some(v) => (v, true),
                None => continue,
            }
        } else if let Some(num) = caps.name("num") {
            match parse_number(num.as_str()) {
                Some(v) => (v, false),
                None => continue,
            }
        } else {
            continue;
        };

        let negative = has_sign(text, whole.start());
        let start = if negative { whole.start() - 1 } else { whole.start() };

        tokens.push(NumericToken {
            value: if negative { -value } else { value },
            start,
            end: whole.end(),
            is_fraction,
            is_percent: caps.name("pct").is_some(),
        });
    }

    tokens
}

/// A `-` directly before the digits is a sign unless it follows a digit or letter
fn has_sign(text: &str, digits_start: usize) -> bool {
    let before = &text[..digits_start];
    let mut chars = before.chars().rev();
    match chars.next() {
        Some('-') => !chars
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '.' || c == ','),
        _ => false,
    }
}

fn parse_fraction(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

fn groups_are_thousands(groups: &[&str]) -> bool {
    match groups.split_first() {
        Some((first, rest)) => {
            !first.is_empty() && first.len() <= 3 && !rest.is_empty() && rest.iter().all(|g| g.len() == 3)
        }
        None => false,
    }
}

/// Parse a digit string with `,` / `.` separators
///
/// `1,234,567.8` and `1.234.567,8` are grouped thousands; a single comma
/// followed by anything other than exactly three digits is a decimal comma; a
/// single dot is always a decimal point.
pub fn parse_number(s: &str) -> Option<f64> {
    let commas = s.matches(',').count();
    let dots = s.matches('.').count();

    let canonical = match (commas, dots) {
        (0, 0) | (0, 1) => s.to_string(),
        (0, _) => {
            let groups: Vec<&str> = s.split('.').collect();
            if !groups_are_thousands(&groups) {
                return None;
            }
            groups.concat()
        }
        (1, 0) => {
            let (int, frac) = s.split_once(',')?;
            if frac.len() == 3 && !int.is_empty() && int.len() <= 3 {
                format!("{}{}", int, frac)
            } else {
                format!("{}.{}", int, frac)
            }
        }
        (_, 0) => {
            let groups: Vec<&str> = s.split(',').collect();
            if !groups_are_thousands(&groups) {
                return None;
            }
            groups.concat()
        }
        _ => {
            let last_comma = s.rfind(',')?;
            let last_dot = s.rfind('.')?;
            if last_comma < last_dot && dots == 1 {
                let (int, frac) = s.split_once('.')?;
                let groups: Vec<&str> = int.split(',').collect();
                if !groups_are_thousands(&groups) {
                    return None;
                }
                format!("{}.{}", groups.concat(), frac)
            } else if last_dot < last_comma && commas == 1 {
                let (int, frac) = s.split_once(',')?;
                let groups: Vec<&str> = int.split('.').collect();
                if !groups_are_thousands(&groups) {
                    return None;
                }
                format!("{}.{}", groups.concat(), frac)
            } else {
                return None;
            }
        }
    };

    canonical.parse::<f64>().ok().filter(|v| v.is_finite())
}
