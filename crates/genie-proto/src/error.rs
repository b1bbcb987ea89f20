use std::time::Duration;

use thiserror::Error;

use crate::SessionState;

/// Result type alias for bridge operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Errors surfaced to callers of a session.
///
/// Completion timeouts are deliberately absent: they degrade to diagnostic
/// text returned as the reply.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The login or launch sequence did not reach `Ready`.
    #[error("session initialization failed: {0}")]
    Initialization(String),

    /// No usable payload could be recovered from the reply.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// The child process channel failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The session was closed, explicitly or because the child died.
    #[error("session is closed")]
    SessionClosed,

    /// The operation needs a launched chat but the session is elsewhere.
    #[error("session is not ready (state: {0})")]
    NotReady(SessionState),

    /// The model picker does not list the requested model.
    #[error("model {model} not found (available: {})", available.join(", "))]
    ModelNotFound {
        model: String,
        available: Vec<String>,
    },

    /// A ctrl-combination was requested for something that is not a letter.
    #[error("invalid control key {0:?}: expected a single letter a-z")]
    InvalidKey(char),

    /// A menu selection index was out of range.
    #[error("invalid menu option {0}: options are numbered from 1")]
    InvalidOption(usize),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Failures of the block extractor and repair pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// No `{` follows the marker.
    #[error("no opening brace found after the json marker")]
    NoOpeningBrace,

    /// The object starting at the first `{` never closes.
    #[error("no balancing closing brace for the json block")]
    NoClosingBrace,

    /// Every repair stage and the regex scrape failed.
    #[error("reply could not be parsed after all repair stages: {0}")]
    Unparseable(String),

    /// The reply parsed, but not to a JSON object.
    #[error("reply parsed to {0}, expected a JSON object")]
    NotAnObject(&'static str),
}

/// Failures of the child process channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The pseudo-terminal or the child could not be created.
    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    /// Writing to the terminal failed.
    #[error("failed to write to the terminal: {0}")]
    Write(#[from] std::io::Error),

    /// None of the expected patterns appeared in time.
    #[error("timed out after {}s waiting for {patterns:?}", timeout.as_secs_f64())]
    ExpectTimeout {
        patterns: Vec<String>,
        timeout: Duration,
    },

    /// The child exited while output was still expected.
    #[error("child process exited while waiting for {patterns:?}")]
    Eof { patterns: Vec<String> },

    /// An expect pattern is not a valid regex.
    #[error("invalid expect pattern {pattern:?}: {reason}")]
    Pattern { pattern: String, reason: String },

    /// The channel was already closed.
    #[error("channel is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_not_found_lists_available_models() {
        let err = BridgeError::ModelNotFound {
            model: "gpt-5".to_string(),
            available: vec!["claude-sonnet-4".to_string(), "claude-haiku".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "model gpt-5 not found (available: claude-sonnet-4, claude-haiku)"
        );
    }

    #[test]
    fn test_extraction_error_is_transparent() {
        let err = BridgeError::from(ExtractionError::NoOpeningBrace);
        assert_eq!(err.to_string(), "no opening brace found after the json marker");
    }

    #[test]
    fn test_expect_timeout_reports_seconds() {
        let err = ChannelError::ExpectTimeout {
            patterns: vec!["Enter Region".to_string()],
            timeout: Duration::from_secs(15),
        };
        assert!(err.to_string().contains("15s"));
    }
}
