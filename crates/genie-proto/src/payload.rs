use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ExtractionError;

/// The GenIE_json reply contract.
///
/// Only ever built from a successfully parsed JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedPayload {
    pub response: String,
    pub tool_use: Option<String>,
    pub approval_required: bool,
    pub approval_prompt: Option<String>,
}

impl ExtractedPayload {
    /// Reads the four fields from a parsed object.
    ///
    /// Field reading is lenient: a missing `response` is empty, `tool_use`
    /// falls back to the legacy `tooluse` key, and `approval_required`
    /// accepts the strings `"true"`/`"false"` as well as booleans.
    pub fn from_value(value: &Value) -> Result<Self, ExtractionError> {
        let object = value
            .as_object()
            .ok_or_else(|| ExtractionError::NotAnObject(json_type_name(value)))?;

        let tool_use = text_field(object, "tool_use")
            .filter(|s| !s.is_empty())
            .or_else(|| text_field(object, "tooluse"));

        let approval_required = match object.get("approval_required") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
            _ => false,
        };

        Ok(Self {
            response: text_field(object, "response").unwrap_or_default(),
            tool_use,
            approval_required,
            approval_prompt: text_field(object, "approval_prompt"),
        })
    }

    /// Whether the reply asks to run a tool.
    pub fn wants_tool(&self) -> bool {
        self.tool_use
            .as_deref()
            .is_some_and(|tool| !tool.trim().is_empty())
    }
}

fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
