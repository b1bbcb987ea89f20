//! Maps a parsed GenIE_json payload to the text shown to the caller.

use genie_proto::ExtractedPayload;

use crate::squeeze::CODE_FENCE;

/// Returned instead of the reply whenever the chat asks to run a tool.
pub const TOOLS_DISABLED_NOTICE: &str = "Agent mode is not currently enabled.";

/// Renders the user-visible reply.
///
/// A tool request overrides everything else, including any approval prompt.
/// Otherwise a required approval prompt is appended after a blank line.
pub fn render(payload: &ExtractedPayload) -> String {
    if payload.wants_tool() {
        return TOOLS_DISABLED_NOTICE.to_string();
    }

    let response = payload.response.replace(CODE_FENCE, "```");
    match payload.approval_prompt.as_deref() {
        Some(prompt) if payload.approval_required => format!("{response}\n\n{prompt}"),
        _ => response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> ExtractedPayload {
        ExtractedPayload::from_value(&value).unwrap()
    }

    #[test]
    fn test_tool_use_overrides_response_and_approval() {
        let p = payload(json!({
            "response": "X",
            "tool_use": "search",
            "approval_required": true,
            "approval_prompt": "ok?"
        }));
        assert_eq!(render(&p), TOOLS_DISABLED_NOTICE);
    }

    #[test]
    fn test_approval_prompt_is_appended() {
        let p = payload(json!({
            "response": "X",
            "tool_use": null,
            "approval_required": true,
            "approval_prompt": "ok?"
        }));
        assert_eq!(render(&p), "X\n\nok?");
    }

    #[test]
    fn test_approval_prompt_ignored_when_not_required() {
        let p = payload(json!({
            "response": "X",
            "approval_required": false,
            "approval_prompt": "ok?"
        }));
        assert_eq!(render(&p), "X");
    }

    #[test]
    fn test_blank_tool_name_is_not_a_tool_request() {
        let p = payload(json!({"response": "X", "tool_use": "  "}));
        assert_eq!(render(&p), "X");
    }

    #[test]
    fn test_code_fences_become_backticks() {
        let p = payload(json!({"response": "Run:\n$$$\nls -la\n$$$"}));
        assert_eq!(render(&p), "Run:\n```\nls -la\n```");
    }
}
