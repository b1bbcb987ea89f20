//! Turns a raw terminal buffer into the reply text returned to callers.
//!
//! The flow is: anchor on the request echo, strip ANSI, squeeze whitespace,
//! cut out the marker-anchored JSON block, run the repair pipeline, and
//! render the payload.

use genie_proto::{END_SENTINEL, ExtractedPayload, ExtractionError, INSTRUCTION_SUFFIX, Request};
use regex::{Regex, RegexBuilder};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::block::extract_json_block;
use crate::postprocess::render;
use crate::repair::{parse_robustly, scrape_response_field};
use crate::squeeze::squeeze_preserving_code;
use crate::text::{after_last, strip_ansi, truncate_with_ellipsis};

/// Returned when the request echo never showed up in the terminal output.
pub const NO_RESPONSE_NOTICE: &str = "No response from the chat CLI";

const LOG_PREVIEW_CHARS: usize = 200;

/// Extracts replies using a case-insensitive marker pattern.
#[derive(Debug, Clone)]
pub struct ResponseProcessor {
    marker: Regex,
}

impl ResponseProcessor {
    /// Compiles `marker` case-insensitively.
    pub fn new(marker: &str) -> Result<Self, regex::Error> {
        let marker = RegexBuilder::new(marker).case_insensitive(true).build()?;
        Ok(Self { marker })
    }

    /// Returns the part of `raw` that answers `request`.
    ///
    /// The text after the last echo of the request is kept, ANSI sequences
    /// are removed and literal `\r\n` escapes are folded to `\n`. `None` when
    /// the echo is missing.
    pub fn filter_reply(&self, request: &Request, raw: &str) -> Option<String> {
        let clean = strip_ansi(raw);
        let anchor = request.echo_anchor();
        let Some(reply) = after_last(&clean, &anchor) else {
            debug!(anchor = %anchor, "Request echo not found in output");
            return None;
        };
        Some(reply.replace("\\r\\n", "\\n"))
    }

    /// Runs the full pipeline for a free-text request.
    ///
    /// A missing echo yields [`NO_RESPONSE_NOTICE`]. A reply without the
    /// marker is treated as prose and wrapped into a payload.
    pub fn process(&self, request: &Request, raw: &str) -> Result<String, ExtractionError> {
        let Some(reply) = self.filter_reply(request, raw) else {
            warn!("No response found for request");
            return Ok(NO_RESPONSE_NOTICE.to_string());
        };

        if self.marker.is_match(&reply) {
            self.extract_reply(&reply)
        } else {
            info!("Reply has no json marker; wrapping prose");
            self.extract_reply(&wrap_prose(&reply))
        }
    }

    /// Extracts and renders the payload embedded in `text`.
    pub fn extract_reply(&self, text: &str) -> Result<String, ExtractionError> {
        let squeezed = squeeze_preserving_code(text);
        debug!(
            text = %truncate_with_ellipsis(&squeezed, LOG_PREVIEW_CHARS),
            "Extracting reply"
        );

        let candidate = match extract_json_block(&squeezed, &self.marker) {
            Ok(block) => block.json,
            Err(ExtractionError::NoClosingBrace) => {
                warn!("Reply json is not balanced; repairing the tail");
                self.unbalanced_tail(&squeezed)
                    .ok_or(ExtractionError::NoClosingBrace)?
            }
            Err(e) => return Err(e),
        };

        match parse_robustly(candidate) {
            Ok(repaired) => {
                let payload = ExtractedPayload::from_value(&repaired.value)?;
                Ok(render(&payload))
            }
            Err(e) => {
                warn!(error = %e, "All repair stages failed; scraping response field");
                scrape_response_field(candidate)
                    .ok_or_else(|| ExtractionError::Unparseable(e.to_string()))
            }
        }
    }

    /// Text from the first `{` after the marker to the end.
    fn unbalanced_tail<'a>(&self, text: &'a str) -> Option<&'a str> {
        let from = self.marker.find(text).map_or(0, |m| m.end());
        text[from..].find('{').map(|offset| &text[from + offset..])
    }
}

/// Wraps a prose reply as `{"response": ...}`.
///
/// Only the text after the echoed instruction suffix is kept, the trailing
/// prompt is dropped and non-ASCII characters are removed.
fn wrap_prose(reply: &str) -> String {
    let suffix = format!("{END_SENTINEL}{INSTRUCTION_SUFFIX}");
    let prose = after_last(reply, &suffix).unwrap_or(reply);
    let ascii: String = prose.chars().filter(char::is_ascii).collect();
    let text = ascii.trim().trim_end_matches('>').trim_end();
    json!({ "response": text }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postprocess::TOOLS_DISABLED_NOTICE;
    use std::time::Duration;

    const T: Duration = Duration::from_secs(30);

    fn processor() -> ResponseProcessor {
        ResponseProcessor::new(r"(?:>\s*)?GenIE_json").unwrap()
    }

    fn echo(question: &str) -> String {
        Request::new(question, T).framed()
    }

    #[test]
    fn test_extracts_plain_reply() {
        let text = "noise > GenIE_json\n{\"response\": \"Hi\", \"tool_use\": null, \"approval_required\": false, \"approval_prompt\": null}";
        assert_eq!(processor().extract_reply(text).unwrap(), "Hi");
    }

    #[test]
    fn test_unescaped_newline_survives_as_newline() {
        let text = "> GenIE_json{\"response\": \"line one\nline two\", \"tool_use\": null}";
        assert_eq!(processor().extract_reply(text).unwrap(), "line one\nline two");
    }

    #[test]
    fn test_tool_request_yields_notice() {
        let text = r#"> GenIE_json{"response": "X", "tool_use": "search", "approval_required": true, "approval_prompt": "ok?"}"#;
        assert_eq!(processor().extract_reply(text).unwrap(), TOOLS_DISABLED_NOTICE);
    }

    #[test]
    fn test_truncated_reply_is_closed() {
        let text = r#"> GenIE_json{"response": "cut here", "tool_use": "#;
        assert_eq!(processor().extract_reply(text).unwrap(), "cut here");
    }

    #[test]
    fn test_fenced_code_keeps_spacing() {
        let text = "> GenIE_json{\"response\": \"Try    this: $$$\\nfn main() {\\n    run();\\n}\\n$$$\"}";
        assert_eq!(
            processor().extract_reply(text).unwrap(),
            "Try this: ```\nfn main() {\n    run();\n}\n```"
        );
    }

    #[test]
    fn test_no_brace_is_an_error() {
        let err = processor().extract_reply("> GenIE_json nothing here").unwrap_err();
        assert_eq!(err, ExtractionError::NoOpeningBrace);
    }

    #[test]
    fn test_non_object_payload_is_an_error() {
        let err = processor().extract_reply("> GenIE_json{[1, 2]}").unwrap_err();
        assert!(matches!(err, ExtractionError::NotAnObject(_) | ExtractionError::Unparseable(_)));
    }

    #[test]
    fn test_process_anchors_on_echo_and_strips_ansi() {
        let request = Request::new("hello there", T);
        let raw = format!(
            "old > GenIE_json{{\"response\": \"stale\"}}\n\x1b[32m{}\x1b[0m\r\n\x1b[1m> GenIE_json\x1b[0m{{\"response\": \"Hi\"}}\r\n> ",
            echo("hello there")
        );
        assert_eq!(processor().process(&request, &raw).unwrap(), "Hi");
    }

    #[test]
    fn test_process_without_echo_returns_notice() {
        let request = Request::new("hello there", T);
        let raw = "> GenIE_json{\"response\": \"Hi\"}";
        assert_eq!(processor().process(&request, raw).unwrap(), NO_RESPONSE_NOTICE);
    }

    #[test]
    fn test_process_wraps_prose_reply() {
        let request = Request::new("hi", T);
        let raw = format!("{}\nHello from the chat ✅\n> ", echo("hi"));
        assert_eq!(processor().process(&request, &raw).unwrap(), "Hello from the chat");
    }

    #[test]
    fn test_multiline_request_anchors_on_first_line() {
        let request = Request::new("first line\nsecond line", T);
        let raw = format!("{}\n> GenIE_json{{\"response\": \"ok\"}}", request.framed());
        assert_eq!(processor().process(&request, &raw).unwrap(), "ok");
    }

    #[test]
    fn test_filter_command_reply() {
        let request = Request::new("/model", T);
        let raw = "> /model\r\nSelect a model\r\n  claude-sonnet-4\r\n> ";
        let reply = processor().filter_reply(&request, raw).unwrap();
        assert!(reply.trim_start().starts_with("Select a model"));
        assert!(reply.contains("claude-sonnet-4"));
    }

    #[test]
    fn test_filter_confirmation_reply() {
        let request = Request::new("y", T);
        let raw = "Are you sure? [y/n]:\n> y\nConversation history cleared";
        assert_eq!(
            processor().filter_reply(&request, raw).as_deref(),
            Some("\nConversation history cleared")
        );
    }

    #[test]
    fn test_filter_folds_escaped_crlf() {
        let request = Request::new("/help", T);
        let raw = r"/help a\r\nb";
        assert_eq!(processor().filter_reply(&request, raw).as_deref(), Some(r" a\nb"));
    }

    #[test]
    fn test_invalid_marker_pattern() {
        assert!(ResponseProcessor::new("(unclosed").is_err());
    }
}
