//! Ordered repair strategies that coerce near-valid JSON into a parse.
//!
//! Each [`RepairStage`] is a pure transformation of the extracted text. The
//! pipeline tries them in order and stops at the first one whose output
//! parses; nothing is shared between attempts.

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;
use tracing::{debug, info};

use crate::encoding::{fix_mojibake, transliterate_ascii};
use crate::structural::repair_structure;

/// `\` runs followed by whitespace and then an escape character.
static SPACED_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\\+\s+([nrtbf"'/\\])"#).expect("static regex"));

/// A double-quoted string literal, escapes included.
static QUOTED_STRING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(?:[^"\\]|\\.)*""#).expect("static regex"));

/// The `response` member's string value, escapes included.
static RESPONSE_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)"response"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("static regex")
});

/// One named repair strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStage {
    /// Parse the extracted text as is.
    Strict,
    /// Drop the BOM, normalize line endings and strip control characters.
    Normalize,
    /// Undo mojibake, normalize, and transliterate to ASCII if still broken.
    Encoding,
    /// Structural repair of the `Encoding` output.
    Structural,
    /// Escape raw control characters inside strings of the `Encoding` output.
    Manual,
    /// Keep only printable ASCII, tab, LF and CR of the `Manual` output.
    AsciiOnly,
}

impl RepairStage {
    /// All stages in the order the pipeline tries them.
    pub const ALL: [RepairStage; 6] = [
        RepairStage::Strict,
        RepairStage::Normalize,
        RepairStage::Encoding,
        RepairStage::Structural,
        RepairStage::Manual,
        RepairStage::AsciiOnly,
    ];

    /// The text this stage hands to the JSON parser.
    pub fn apply(self, raw: &str) -> String {
        match self {
            RepairStage::Strict => raw.to_string(),
            RepairStage::Normalize => normalize(raw),
            RepairStage::Encoding => fix_encoding(raw),
            RepairStage::Structural => repair_structure(&fix_encoding(raw)),
            RepairStage::Manual => escape_strings(&fix_encoding(raw)),
            RepairStage::AsciiOnly => ascii_only(&escape_strings(&fix_encoding(raw))),
        }
    }

    /// Applies the stage and parses the result.
    pub fn attempt(self, raw: &str) -> Result<Repaired, serde_json::Error> {
        let text = self.apply(raw);
        let value = serde_json::from_str(&text)?;
        Ok(Repaired {
            value,
            text,
            stage: self,
        })
    }
}

impl fmt::Display for RepairStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepairStage::Strict => "strict",
            RepairStage::Normalize => "normalize",
            RepairStage::Encoding => "encoding",
            RepairStage::Structural => "structural",
            RepairStage::Manual => "manual",
            RepairStage::AsciiOnly => "ascii_only",
        };
        f.write_str(name)
    }
}

/// A successful parse and the stage that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    pub value: Value,
    /// The exact text that parsed.
    pub text: String,
    pub stage: RepairStage,
}

/// Runs the stages in order; the first parse wins.
///
/// Returns the last stage's parse error when everything fails.
pub fn parse_robustly(raw: &str) -> Result<Repaired, serde_json::Error> {
    let (last, earlier) = (RepairStage::AsciiOnly, &RepairStage::ALL[..5]);
    for &stage in earlier {
        match stage.attempt(raw) {
            Ok(repaired) => {
                info!(%stage, "Parsed reply json");
                return Ok(repaired);
            }
            Err(e) => debug!(%stage, error = %e, "Repair stage failed"),
        }
    }
    last.attempt(raw)
        .inspect(|_| info!(stage = %last, "Parsed reply json"))
        .inspect_err(|e| debug!(stage = %last, error = %e, "Repair stage failed"))
}

/// Pulls the `response` string out of text that would not parse.
///
/// Only `\"` and `\n` are unescaped; the rest of the value is returned raw.
pub fn scrape_response_field(text: &str) -> Option<String> {
    let captures = RESPONSE_FIELD.captures(text)?;
    Some(captures[1].replace("\\\"", "\"").replace("\\n", "\n"))
}

fn normalize(text: &str) -> String {
    text.trim_start_matches('\u{feff}')
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter(|&c| matches!(c, '\t' | '\n' | ' '..='~') || c > '\u{9f}')
        .collect()
}

fn fix_encoding(text: &str) -> String {
    let fixed = normalize(&fix_mojibake(text));
    if serde_json::from_str::<Value>(&fixed).is_ok() {
        return fixed;
    }
    let ascii = transliterate_ascii(&fixed);
    if ascii != fixed {
        info!("Transliterated reply to ASCII");
    }
    ascii
}

/// Collapses spaced escapes and escapes raw control characters in strings.
fn escape_strings(text: &str) -> String {
    let collapsed = SPACED_ESCAPE.replace_all(text, "\\$1");
    QUOTED_STRING
        .replace_all(&collapsed, |caps: &Captures<'_>| {
            escape_controls(&caps[0]).into_owned()
        })
        .into_owned()
}

fn escape_controls(literal: &str) -> Cow<'_, str> {
    if !literal.contains(['\n', '\t', '\r']) {
        return Cow::Borrowed(literal);
    }
    Cow::Owned(
        literal
            .replace('\n', "\\n")
            .replace('\t', "\\t")
            .replace('\r', "\\r"),
    )
}

fn ascii_only(text: &str) -> String {
    text.chars()
        .filter(|&c| matches!(c, ' '..='~' | '\t' | '\n' | '\r'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_json_parses_strictly() {
        let repaired = parse_robustly(r#"{"response": "Hi"}"#).unwrap();
        assert_eq!(repaired.stage, RepairStage::Strict);
        assert_eq!(repaired.value, json!({"response": "Hi"}));
    }

    #[test]
    fn test_bom_and_controls_need_normalize() {
        let raw = "\u{feff}{\"response\": \"Hi\u{7}\u{85}\"}";
        let repaired = parse_robustly(raw).unwrap();
        assert_eq!(repaired.stage, RepairStage::Normalize);
        assert_eq!(repaired.value, json!({"response": "Hi"}));
    }

    #[test]
    fn test_trailing_comma_needs_structural() {
        let repaired = parse_robustly(r#"{"response": "Hi", "tool_use": null,}"#).unwrap();
        assert_eq!(repaired.stage, RepairStage::Structural);
        assert_eq!(repaired.value, json!({"response": "Hi", "tool_use": null}));
    }

    #[test]
    fn test_raw_newline_in_string_fixed_by_manual_stage() {
        let raw = "{\"response\": \"line one\nline two\", \"tool_use\": null}";
        let repaired = parse_robustly(raw).unwrap();
        assert_eq!(repaired.stage, RepairStage::Manual);
        assert_eq!(repaired.value["response"], "line one\nline two");
        assert!(repaired.text.contains("line one\\nline two"));
    }

    #[test]
    fn test_non_latin_reply_with_raw_newline_keeps_its_text() {
        let raw = "{\"response\": \"日本語の説明\nПривет мир\", \"tool_use\": null}";
        let repaired = parse_robustly(raw).unwrap();
        assert_eq!(repaired.stage, RepairStage::Manual);

        let response = repaired.value["response"].as_str().unwrap();
        let (first, second) = response.split_once('\n').unwrap();
        assert!(first.chars().any(|c| c.is_ascii_alphabetic()), "{response:?}");
        assert_eq!(second, "Privet mir");
    }

    #[test]
    fn test_spaced_escape_collapsed_by_manual_stage() {
        let raw = r#"{"response": "a\ nb"}"#;
        let repaired = parse_robustly(raw).unwrap();
        assert_eq!(repaired.stage, RepairStage::Manual);
        assert_eq!(repaired.value["response"], "a\nb");
    }

    #[test]
    fn test_unrecoverable_text_fails() {
        assert!(parse_robustly("{{{{ not json at all :::").is_err());
    }

    #[test]
    fn test_each_stage_is_idempotent_on_its_output() {
        let inputs = [
            r#"{"response": "Hi"}"#,
            "\u{feff}{\"response\": \"Hi\u{7}\"}",
            "{\"response\": \"itâ€™s\"}",
            r#"{"response": "x", "tool_use": null,}"#,
            "{\"response\": \"a\nb\"}",
            "{\"response\": \"é\nb\"}",
        ];
        for raw in inputs {
            for stage in RepairStage::ALL {
                let first = stage.apply(raw);
                let second = stage.apply(&first);
                let parse_first = serde_json::from_str::<Value>(&first).ok();
                let parse_second = serde_json::from_str::<Value>(&second).ok();
                if parse_first.is_some() {
                    assert_eq!(parse_first, parse_second, "stage {stage} on {raw:?}");
                }
            }
        }
    }

    #[test]
    fn test_scrape_handles_escaped_quotes() {
        let text = r#"{"response": "say \"hi\"\nthen go", "tool_use": broken"#;
        assert_eq!(
            scrape_response_field(text).as_deref(),
            Some("say \"hi\"\nthen go")
        );
    }

    #[test]
    fn test_scrape_without_field() {
        assert_eq!(scrape_response_field(r#"{"answer": "x"}"#), None);
    }

    #[test]
    fn test_stage_names() {
        let names: Vec<String> = RepairStage::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            ["strict", "normalize", "encoding", "structural", "manual", "ascii_only"]
        );
    }
}
