use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Start sentinel wrapped around free text.
pub const START_SENTINEL: &str = "*~";

/// End sentinel wrapped around free text.
pub const END_SENTINEL: &str = "~*";

/// Appended after the end sentinel so the chat answers in GenIE_json.
pub const INSTRUCTION_SUFFIX: &str =
    ". Use the given special instructions to respond in the provided json Response schema.";

/// How a request is typed into the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Leading `/`, a control command such as `/model`.
    Command,
    /// Leading `@`, a prompt or agent mention.
    Mention,
    /// A bare `y`, `n` or `t` answering a confirmation prompt.
    Confirmation,
    /// Anything else; framed with sentinels and the instruction suffix.
    FreeText,
}

impl RequestKind {
    /// Classifies already-trimmed input.
    pub fn classify(text: &str) -> Self {
        if text.starts_with('/') {
            RequestKind::Command
        } else if text.starts_with('@') {
            RequestKind::Mention
        } else if matches!(text, "y" | "n" | "t") {
            RequestKind::Confirmation
        } else {
            RequestKind::FreeText
        }
    }

    /// Whether the reply is expected to carry a GenIE_json payload.
    pub fn expects_payload(self) -> bool {
        self == RequestKind::FreeText
    }
}

/// A single logical request sent to the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    text: String,
    kind: RequestKind,
    timeout: Duration,
}

impl Request {
    /// Builds a request, trimming the text and classifying it.
    ///
    /// Line breaks in free text become literal `\n` escapes so the whole
    /// prompt is typed as one terminal line.
    pub fn new(text: impl AsRef<str>, timeout: Duration) -> Self {
        let trimmed = text.as_ref().trim();
        let kind = RequestKind::classify(trimmed);
        let text = if kind == RequestKind::FreeText {
            trimmed.replace("\r\n", "\n").replace('\n', "\\n")
        } else {
            trimmed.to_string()
        };
        Self {
            text,
            kind,
            timeout,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The exact line written to the terminal.
    pub fn framed(&self) -> String {
        match self.kind {
            RequestKind::FreeText => format!(
                "{START_SENTINEL}{}{END_SENTINEL}{INSTRUCTION_SUFFIX}",
                self.text
            ),
            _ => self.text.clone(),
        }
    }

    /// Text the terminal echoes back right before the reply starts.
    ///
    /// Replies are anchored on the last occurrence of this echo.
    pub fn echo_anchor(&self) -> String {
        match self.kind {
            RequestKind::Command | RequestKind::Mention => self.text.clone(),
            RequestKind::Confirmation => format!("> {}", self.text),
            RequestKind::FreeText => {
                let first_line = self.text.split("\\n").next().unwrap_or_default();
                format!("{START_SENTINEL}{first_line}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(10);

    #[test]
    fn test_classification() {
        assert_eq!(Request::new("/model", T).kind(), RequestKind::Command);
        assert_eq!(Request::new("@genie", T).kind(), RequestKind::Mention);
        assert_eq!(Request::new(" y ", T).kind(), RequestKind::Confirmation);
        assert_eq!(Request::new("yes", T).kind(), RequestKind::FreeText);
        assert_eq!(Request::new("what is rust?", T).kind(), RequestKind::FreeText);
    }

    #[test]
    fn test_free_text_is_framed() {
        let request = Request::new("hello", T);
        assert_eq!(
            request.framed(),
            "*~hello~*. Use the given special instructions to respond in the provided json Response schema."
        );
    }

    #[test]
    fn test_commands_are_sent_verbatim() {
        let request = Request::new("  /save -f \"/tmp/a.json\"  ", T);
        assert_eq!(request.framed(), "/save -f \"/tmp/a.json\"");
        assert_eq!(request.echo_anchor(), "/save -f \"/tmp/a.json\"");
    }

    #[test]
    fn test_multiline_free_text_is_folded() {
        let request = Request::new("line one\r\nline two", T);
        assert_eq!(request.text(), "line one\\nline two");
        assert_eq!(request.echo_anchor(), "*~line one");
    }

    #[test]
    fn test_confirmation_anchor_includes_prompt() {
        assert_eq!(Request::new("y", T).echo_anchor(), "> y");
    }
}
