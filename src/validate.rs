//! Plausibility checks for model output.
//!
//! These reject output that is obviously broken (empty, an error echo, a cut
//! off JSON fragment or a truncated last line). They say nothing about
//! whether a plausible answer is correct.

use serde::{Deserialize, Serialize};
use std::fmt;

const FAILURE_TOKENS: &[&str] = &["error", "null", "undefined", "none", "{}", "[]"];

const FAILURE_PHRASES: &[&str] = &[
    "rate limit",
    "quota",
    "unauthorized",
    "forbidden",
    "internal server error",
];

/// Characters that may legitimately end a complete last line.
const TERMINAL_PUNCTUATION: &[char] = &[
    '.', '!', '?', ';', ':', ',', ')', ']', '}', '>', '"', '\'', '`', '*', '/', '-', '=', '+', '%', '|', '&',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    FailureToken,
    UnterminatedJson,
    Truncated,
    TooShort,
    ApiFailure,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Empty => "empty",
            Rejection::FailureToken => "failure_token",
            Rejection::UnterminatedJson => "unterminated_json",
            Rejection::Truncated => "truncated",
            Rejection::TooShort => "too_short",
            Rejection::ApiFailure => "api_failure_text",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Rejection::Empty => "output is empty",
            Rejection::FailureToken => "output is a bare failure token",
            Rejection::UnterminatedJson => "output is an unterminated JSON fragment",
            Rejection::Truncated => "output looks truncated",
            Rejection::TooShort => "output is too short",
            Rejection::ApiFailure => "output reads like an API failure message",
        };
        f.write_str(text)
    }
}

/// Thresholds for the heuristics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Output shorter than this many characters is rejected.
    pub min_chars: usize,
    /// A last line that ends mid-word is treated as cut off below this length.
    pub short_line_chars: usize,
    /// Output up to this many characters is searched whole for API failure
    /// phrases.
    pub full_scan_chars: usize,
    /// Leading characters searched for API failure phrases in longer output.
    pub phrase_window: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self { min_chars: 20, short_line_chars: 8, full_scan_chars: 1000, phrase_window: 200 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub valid: bool,
    pub reason: Option<Rejection>,
}

impl Verdict {
    fn accept() -> Self {
        Self { valid: true, reason: None }
    }

    fn reject(reason: Rejection) -> Self {
        Self { valid: false, reason: Some(reason) }
    }
}

pub fn is_valid(content: &str, cfg: &ValidatorConfig) -> bool {
    check(content, cfg).valid
}

/// Apply the rules in order; the first one that matches decides.
pub fn check(content: &str, cfg: &ValidatorConfig) -> Verdict {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Verdict::reject(Rejection::Empty);
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let lowered = trimmed.to_lowercase();
    if FAILURE_TOKENS.iter().any(|t| *t == lowered || *t == compact) {
        return Verdict::reject(Rejection::FailureToken);
    }

    if (trimmed.starts_with('{') || trimmed.starts_with('[')) && !closes_first_structure(trimmed) {
        return Verdict::reject(Rejection::UnterminatedJson);
    }

    if let Some(last) = trimmed.lines().map(str::trim).filter(|l| !l.is_empty()).last() {
        if ends_mid_word(last) && last.chars().count() < cfg.short_line_chars {
            return Verdict::reject(Rejection::Truncated);
        }
    }

    let length = trimmed.chars().count();
    if length < cfg.min_chars {
        return Verdict::reject(Rejection::TooShort);
    }

    let scanned: String = if length <= cfg.full_scan_chars {
        lowered
    } else {
        lowered.chars().take(cfg.phrase_window).collect()
    };
    if FAILURE_PHRASES.iter().any(|p| scanned.contains(p)) {
        return Verdict::reject(Rejection::ApiFailure);
    }

    Verdict::accept()
}

fn ends_mid_word(line: &str) -> bool {
    match line.chars().last() {
        Some(c) => c.is_alphanumeric() && !TERMINAL_PUNCTUATION.contains(&c),
        None => false,
    }
}

/// True when the bracket opened by the first character is closed somewhere
/// in `text`. Brackets inside string literals are ignored.
fn closes_first_structure(text: &str) -> bool {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}
