//! Locates the JSON object that follows the marker token in a reply.

use genie_proto::ExtractionError;
use regex::Regex;

/// A JSON object cut out of surrounding text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonBlock<'a> {
    /// The object text, from `{` to its balancing `}` inclusive.
    pub json: &'a str,
    /// Byte offset of the opening brace.
    pub start: usize,
    /// Byte offset one past the closing brace.
    pub end: usize,
}

/// Extracts the first balanced JSON object after `marker`.
///
/// The scan starts at the end of the first marker match, or at the start of
/// the text when the marker is absent. Braces inside double-quoted strings
/// (with backslash escapes honored) do not count towards the depth.
pub fn extract_json_block<'a>(
    text: &'a str,
    marker: &Regex,
) -> Result<JsonBlock<'a>, ExtractionError> {
    let from = marker.find(text).map_or(0, |m| m.end());
    let start = text[from..]
        .find('{')
        .map(|offset| from + offset)
        .ok_or(ExtractionError::NoOpeningBrace)?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    // Only ASCII bytes are inspected, so byte offsets stay on char boundaries.
    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return Ok(JsonBlock {
                        json: &text[start..end],
                        start,
                        end,
                    });
                }
            }
            _ => {}
        }
    }

    Err(ExtractionError::NoClosingBrace)
}
