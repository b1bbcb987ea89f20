//! The GenIE_json instructions document.
//!
//! The chat CLI loads this file with `/context add` right after launch. It
//! pins the four-field reply schema, the marker token and the `$$$` code
//! fence that the extraction pipeline relies on.

use std::fs;
use std::io;
use std::path::Path;

use tracing::info;

use crate::squeeze::CODE_FENCE;

/// Token the chat is told to print before the reply json.
pub const MARKER_TOKEN: &str = "GenIE_json";

/// Builds the instructions document.
#[derive(Debug)]
pub struct InstructionBuilder {
    marker: String,
}

impl Default for InstructionBuilder {
    fn default() -> Self {
        Self::new(MARKER_TOKEN)
    }
}

impl InstructionBuilder {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// Renders the full document.
    pub fn build(&self) -> String {
        format!(
            r#"Here's the {marker} schema. Use it when I say in the prompt to use it, as I will be passing the response to another app:

**JSON Response Schema:**

{marker}
{{
	"response": "string - The main response content to the user's request. Do not include raw line breaks inside.",
	"tool_use": "string|null - Name of the tool that you want to use, or null if no tool needs to be used",
	"approval_required": "boolean - true if user approval is needed before proceeding with tool actions, false otherwise",
	"approval_prompt": "string|null - Specific question/request for user approval, or null if no approval needed"
}}

**Special Instructions:**
- Start the response with {marker}
- Always format responses as valid json with the above structure for this session
- Include the main response content in the 'response' field
- Replace all raw line breaks with '\n'
- If you want to ask "Allow this action? Use 't' to trust (always allow) this tool for the session. [y/n/t]" then set it as the approval string in 'approval_prompt' and approval_required to true. Set 'tool_use' to the name of the tool you intend to use, or null if none
- Set both 'tool_use' and 'approval_prompt' to null when no tools are required
- Ensure json is properly escaped and formatted
- When showing a code block in json responses, wrap it with triple dollar signs ({fence}\n) before and after the code
- Once your response is ready, verify the response is in the given json schema
- The user can understand the response in {marker} format only

Please ensure your {marker} response is portable by following these rules:
- Never include literal newline characters inside json string values
- Always escape newlines as \n within strings (not actual line breaks)
- Use only standard ASCII characters, no Unicode control characters or smart quotes
- Ensure all string content is properly escaped according to the {marker} specification
- Validate the {marker}
"#,
            marker = self.marker,
            fence = CODE_FENCE,
        )
    }

    /// Writes the document to `path` unless the file already exists.
    ///
    /// Returns whether a file was written.
    pub fn write_if_missing(&self, path: &Path) -> io::Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.build())?;
        info!(path = %path.display(), "Wrote instructions document");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_document_names_all_fields() {
        let doc = InstructionBuilder::default().build();
        for field in ["\"response\"", "\"tool_use\"", "\"approval_required\"", "\"approval_prompt\""] {
            assert!(doc.contains(field), "missing {field}");
        }
        assert!(doc.contains("Start the response with GenIE_json"));
        assert!(doc.contains("($$$\\n)"));
    }

    #[test]
    fn test_custom_marker() {
        let doc = InstructionBuilder::new("REPLY_json").build();
        assert!(doc.contains("REPLY_json\n{"));
        assert!(!doc.contains("GenIE_json"));
    }

    #[test]
    fn test_write_if_missing_creates_once() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ctx").join("genie_info.txt");
        let builder = InstructionBuilder::default();

        assert!(builder.write_if_missing(&path).unwrap());
        fs::write(&path, "edited").unwrap();
        assert!(!builder.write_if_missing(&path).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "edited");
    }
}
