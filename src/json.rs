//! Minimal JSON writer for chat requests and a single-field string extractor
//! for response bodies.
//!
//! Only the handful of shapes the adapters send are encoded, and only one
//! string field is ever read back out of a response. The extractor is a
//! character-level state machine, so a body that is malformed or cut short
//! still yields whatever part of the field was received.

use std::fmt::Write as _;

/// A scalar request option such as `temperature` or `stream`.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn write_to(&self, out: &mut String) {
        match self {
            Scalar::Str(s) => {
                out.push('"');
                out.push_str(&escape(s));
                out.push('"');
            }
            Scalar::Int(n) => {
                let _ = write!(out, "{n}");
            }
            Scalar::Float(x) if x.is_finite() => {
                let _ = write!(out, "{x}");
            }
            Scalar::Float(_) => out.push_str("null"),
            Scalar::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        }
    }
}

/// Escape `raw` for use inside a JSON string literal.
///
/// Backslash goes first so escapes inserted for the other characters are not
/// escaped a second time. Remaining control characters use `\u00XX`.
pub fn escape(raw: &str) -> String {
    let escaped = raw
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\t', "\\t")
        .replace('\r', "\\r")
        .replace('\n', "\\n");
    if !escaped.chars().any(|c| c.is_control()) {
        return escaped;
    }
    let mut out = String::with_capacity(escaped.len() + 8);
    for c in escaped.chars() {
        if (c as u32) < 0x20 || c == '\u{7f}' {
            let _ = write!(out, "\\u{:04x}", c as u32);
        } else {
            out.push(c);
        }
    }
    out
}

/// Reverse of [`escape`]: decode the body of a JSON string literal
/// (without its surrounding quotes).
pub fn unescape(escaped: &str) -> String {
    let mut decoder = StringDecoder::default();
    let mut out = String::with_capacity(escaped.len());
    for c in escaped.chars() {
        decoder.feed(c, &mut out);
    }
    out
}

/// Encode a single-turn chat request:
/// `{"model":..,"messages":[{"role":"user","content":..}],<options>}`.
pub fn encode_request(model: &str, content: &str, options: &[(&str, Scalar)]) -> String {
    let mut out = String::with_capacity(content.len() + model.len() + 64);
    out.push_str("{\"model\":\"");
    out.push_str(&escape(model));
    out.push_str("\",\"messages\":[{\"role\":\"user\",\"content\":\"");
    out.push_str(&escape(content));
    out.push_str("\"}]");
    for (key, value) in options {
        out.push_str(",\"");
        out.push_str(&escape(key));
        out.push_str("\":");
        value.write_to(&mut out);
    }
    out.push('}');
    out
}

/// Extract the string value of the first `"field": "<value>"` occurrence in
/// `body`.
///
/// Raw line breaks are skipped everywhere (JSON strings cannot contain them,
/// so they only appear when a body was wrapped). Occurrences whose value is
/// not a string (`"message": {`) are passed over. If the body ends inside the
/// value, the part decoded so far is returned. Returns `None` when no string
/// value for `field` starts in `body`.
///
/// The first textual occurrence wins, at whatever nesting depth it sits.
pub fn extract_field(body: &str, field: &str) -> Option<String> {
    let pattern: Vec<char> = format!("\"{field}\"").chars().collect();
    let mut state = Scan::Seeking { matched: 0 };
    let mut prev = '\0';
    let mut decoder = StringDecoder::default();
    let mut value = String::new();

    for c in body.chars() {
        if c == '\n' || c == '\r' {
            continue;
        }
        state = match state {
            Scan::Seeking { matched } => {
                if c == pattern[matched] && (matched > 0 || prev != '\\') {
                    if matched + 1 == pattern.len() {
                        Scan::AfterKey
                    } else {
                        Scan::Seeking { matched: matched + 1 }
                    }
                } else if c == pattern[0] && prev != '\\' {
                    Scan::Seeking { matched: 1 }
                } else {
                    Scan::Seeking { matched: 0 }
                }
            }
            Scan::AfterKey => match c {
                ':' => Scan::AfterColon,
                c if c.is_whitespace() => Scan::AfterKey,
                '"' => Scan::Seeking { matched: 1 },
                _ => Scan::Seeking { matched: 0 },
            },
            Scan::AfterColon => match c {
                '"' => Scan::InValue,
                c if c.is_whitespace() => Scan::AfterColon,
                _ => Scan::Seeking { matched: 0 },
            },
            Scan::InValue => {
                if c == '"' && !decoder.is_pending() {
                    return Some(value);
                }
                decoder.feed(c, &mut value);
                Scan::InValue
            }
        };
        prev = c;
    }

    match state {
        Scan::InValue => Some(value),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum Scan {
    /// Looking for `"field"`; `matched` pattern chars seen so far.
    Seeking { matched: usize },
    /// Key matched, waiting for `:`.
    AfterKey,
    /// Colon seen, waiting for the opening quote of the value.
    AfterColon,
    /// Inside the value.
    InValue,
}

/// Incremental decoder for the inside of a JSON string literal.
#[derive(Debug, Default)]
struct StringDecoder {
    escape_pending: bool,
    /// Hex digits collected for a `\uXXXX` escape in progress.
    unicode: Option<String>,
    /// High surrogate waiting for its low half.
    high_surrogate: Option<u32>,
}

impl StringDecoder {
    fn is_pending(&self) -> bool {
        self.escape_pending || self.unicode.is_some()
    }

    fn feed(&mut self, c: char, out: &mut String) {
        if let Some(hex) = self.unicode.as_mut() {
            hex.push(c);
            if hex.len() >= 4 {
                let code = u32::from_str_radix(hex, 16).ok();
                self.unicode = None;
                match code {
                    Some(code) => self.push_code_unit(code, out),
                    None => out.push(char::REPLACEMENT_CHARACTER),
                }
            }
            return;
        }
        if self.escape_pending {
            self.escape_pending = false;
            let decoded = match c {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                'b' => '\u{8}',
                'f' => '\u{c}',
                'u' => {
                    self.unicode = Some(String::with_capacity(4));
                    return;
                }
                // `\"`, `\\`, `\/` and anything unknown decode to the char itself
                other => other,
            };
            self.flush_surrogate(out);
            out.push(decoded);
            return;
        }
        if c == '\\' {
            self.escape_pending = true;
            return;
        }
        self.flush_surrogate(out);
        out.push(c);
    }

    fn push_code_unit(&mut self, code: u32, out: &mut String) {
        match code {
            0xD800..=0xDBFF => {
                self.flush_surrogate(out);
                self.high_surrogate = Some(code);
            }
            0xDC00..=0xDFFF => match self.high_surrogate.take() {
                Some(high) => {
                    let combined = 0x10000 + ((high - 0xD800) << 10) + (code - 0xDC00);
                    out.push(char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER));
                }
                None => out.push(char::REPLACEMENT_CHARACTER),
            },
            _ => {
                self.flush_surrogate(out);
                out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
        }
    }

    fn flush_surrogate(&mut self, out: &mut String) {
        if self.high_surrogate.take().is_some() {
            out.push(char::REPLACEMENT_CHARACTER);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(field: &str, raw: &str) -> String {
        format!("{{\"{}\":\"{}\"}}", field, escape(raw))
    }

    #[test]
    fn escape_handles_each_special_once() {
        assert_eq!(escape(r"a\b"), r"a\\b");
        assert_eq!(escape("say \"hi\""), r#"say \"hi\""#);
        assert_eq!(escape("a\tb\r\nc"), r"a\tb\r\nc");
        // an existing escape sequence in the input is escaped, not preserved
        assert_eq!(escape(r"\n"), r"\\n");
        assert_eq!(escape("\u{1}"), r"\u0001");
    }

    #[test]
    fn escape_round_trips_through_extract() {
        let samples = [
            "plain",
            "back\\slash",
            "\"quoted\"",
            "tab\there",
            "line1\nline2\r\nline3",
            "mixed \\\"\t\r\n end",
            "fn main() {\n\tprintln!(\"{}\", \"\\\\\");\n}",
            "",
        ];
        for s in samples {
            assert_eq!(extract_field(&wrap("v", s), "v").as_deref(), Some(s), "sample {s:?}");
            assert_eq!(unescape(&escape(s)), s);
        }
    }

    #[test]
    fn encode_request_shape() {
        let wire = encode_request(
            "vendor/model",
            "Fix:\n\"x\"",
            &[("temperature", Scalar::Float(0.2)), ("stream", Scalar::Bool(false))],
        );
        assert_eq!(
            wire,
            r#"{"model":"vendor/model","messages":[{"role":"user","content":"Fix:\n\"x\""}],"temperature":0.2,"stream":false}"#
        );
        let parsed: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed["messages"][0]["content"], "Fix:\n\"x\"");
    }

    #[test]
    fn encoded_control_chars_are_valid_json() {
        let wire = encode_request("m", "bell\u{7}", &[("n", Scalar::Int(3)), ("x", Scalar::Float(f64::NAN))]);
        let parsed: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed["messages"][0]["content"], "bell\u{7}");
        assert!(parsed["x"].is_null());
    }

    #[test]
    fn extracts_remote_chat_content() {
        let body = r#"{"id":"gen-1","choices":[{"index":0,"message":{"role":"assistant","content":"def f():\n    return \"ok\""},"finish_reason":"stop"}]}"#;
        assert_eq!(extract_field(body, "content").unwrap(), "def f():\n    return \"ok\"");
    }

    #[test]
    fn skips_non_string_values_for_the_same_name() {
        let body = r#"{"message":{"role":"assistant","content":"hi"},"error":{"message":"bad model"}}"#;
        assert_eq!(extract_field(body, "message").as_deref(), Some("bad model"));
        assert_eq!(extract_field(r#"{"content":null}"#, "content"), None);
    }

    #[test]
    fn tolerates_artificial_line_breaks_and_spacing() {
        let body = "{\"mess\nage\": {\"con\r\ntent\"  :\n  \"hel\nlo\"}}";
        assert_eq!(extract_field(body, "content").as_deref(), Some("hello"));
    }

    #[test]
    fn ignores_escaped_key_inside_other_values() {
        let body = r#"{"note":"the \"content\": \"fake\" trick","content":"real"}"#;
        assert_eq!(extract_field(body, "content").as_deref(), Some("real"));
    }

    #[test]
    fn first_textual_match_wins() {
        let body = r#"{"meta":{"content":"nested first"},"content":"top level"}"#;
        assert_eq!(extract_field(body, "content").as_deref(), Some("nested first"));
    }

    #[test]
    fn decodes_unicode_escapes() {
        let body = r#"{"content":"a \u003c b \u0026\u0026 c \ud83d\ude00"}"#;
        assert_eq!(extract_field(body, "content").as_deref(), Some("a < b && c 😀"));
    }

    #[test]
    fn truncated_body_yields_prefix_of_full_value() {
        let body = r#"{"message":{"role":"assistant","content":"line \"one\"\nline\ttwo \\ end é"},"done":true}"#;
        let full = extract_field(body, "content").unwrap();
        for cut in 0..=body.len() {
            if !body.is_char_boundary(cut) {
                continue;
            }
            let partial = extract_field(&body[..cut], "content").unwrap_or_default();
            assert!(full.starts_with(&partial), "cut {cut}: {partial:?} not a prefix of {full:?}");
        }
    }

    #[test]
    fn missing_field_is_none() {
        assert_eq!(extract_field(r#"{"choices":[]}"#, "content"), None);
        assert_eq!(extract_field("", "content"), None);
        assert_eq!(extract_field("not json at all", "content"), None);
    }
}
