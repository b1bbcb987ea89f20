use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why the completion detector stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// A prompt suffix was seen and the stream then stayed silent.
    EomDetected,
    /// The timeout elapsed after data arrived, without a settled prompt.
    OverallTimeout,
    /// Nothing arrived within the timeout.
    NoData,
    /// The child exited while the reply was being read.
    ChannelClosed,
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompletionReason::EomDetected => "eom_detected",
            CompletionReason::OverallTimeout => "overall_timeout",
            CompletionReason::NoData => "no_data",
            CompletionReason::ChannelClosed => "channel_closed",
        };
        f.write_str(name)
    }
}

/// Text accumulated for one request plus the reason reading stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub text: String,
    pub reason: CompletionReason,
    diagnostic: bool,
}

impl RawResponse {
    pub fn new(text: impl Into<String>, reason: CompletionReason) -> Self {
        Self {
            text: text.into(),
            reason,
            diagnostic: false,
        }
    }

    fn diagnostic(text: String, reason: CompletionReason) -> Self {
        Self {
            text,
            reason,
            diagnostic: true,
        }
    }

    /// Diagnostic reply for a stream that never produced a byte.
    pub fn no_data(timeout: Duration) -> Self {
        Self::diagnostic(
            format!(
                "No data received and timed-out after {}s",
                timeout.as_secs_f64()
            ),
            CompletionReason::NoData,
        )
    }

    /// Diagnostic reply for a timeout that left nothing in the buffer.
    pub fn overall_timeout(timeout: Duration) -> Self {
        Self::diagnostic(
            format!("Overall timeout reached : {}s", timeout.as_secs_f64()),
            CompletionReason::OverallTimeout,
        )
    }

    /// Whether the text is a timeout diagnostic rather than program output.
    pub fn is_diagnostic(&self) -> bool {
        self.diagnostic
    }
}
