//! Decides when the chat has finished answering.
//!
//! The chat never signals the end of a reply explicitly. A reply counts as
//! finished once a prompt suffix has been seen and the stream has then stayed
//! silent for the silence threshold. Two timeouts bound the wait when the
//! suffix never shows up.

use std::time::Duration;

use genie_core::{BridgeConfig, strip_ansi};
use genie_proto::{ChannelError, CompletionReason, RawResponse};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::{ChildProcessChannel, READ_SIZE};

const SPINNER_TEXT: &str = "Thinking...";

/// Reads one reply off a channel.
#[derive(Debug, Clone)]
pub struct CompletionDetector {
    prompt_suffixes: Vec<String>,
    silence_threshold: Duration,
    poll_interval: Duration,
}

impl CompletionDetector {
    pub fn new(
        prompt_suffixes: Vec<String>,
        silence_threshold: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            prompt_suffixes,
            silence_threshold,
            poll_interval,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            config.prompt_suffixes.clone(),
            config.silence_threshold(),
            config.poll_interval(),
        )
    }

    /// Accumulates output until the reply is complete or `timeout` passes
    /// without any output.
    ///
    /// Never fails: timeouts come back as diagnostic text and a dead child
    /// as [`CompletionReason::ChannelClosed`] with whatever was read.
    pub async fn collect(
        &self,
        channel: &mut dyn ChildProcessChannel,
        timeout: Duration,
    ) -> RawResponse {
        let mut buffer = String::new();
        let mut loop_start = Instant::now();
        let mut last_data = loop_start;
        let mut eom = false;
        let mut received = false;

        loop {
            if loop_start.elapsed() > timeout {
                return if !received {
                    info!(timeout_secs = timeout.as_secs_f64(), "No data received before timeout");
                    RawResponse::no_data(timeout)
                } else if buffer.is_empty() {
                    warn!(timeout_secs = timeout.as_secs_f64(), "Overall timeout reached");
                    RawResponse::overall_timeout(timeout)
                } else {
                    warn!(
                        timeout_secs = timeout.as_secs_f64(),
                        bytes = buffer.len(),
                        "Overall timeout reached, returning partial output"
                    );
                    RawResponse::new(buffer, CompletionReason::OverallTimeout)
                };
            }

            match channel.read_nonblocking(READ_SIZE) {
                Ok(chunk) if chunk.is_empty() => {
                    if eom && last_data.elapsed() > self.silence_threshold {
                        debug!(bytes = buffer.len(), "Prompt seen and output settled");
                        return RawResponse::new(buffer, CompletionReason::EomDetected);
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
                Ok(chunk) => {
                    let now = Instant::now();
                    loop_start = now;
                    last_data = now;
                    eom = false;
                    received = true;

                    let stripped = strip_ansi(&chunk);
                    if is_spinner(&stripped) {
                        debug!("Spinner frame");
                    } else {
                        eom = self.ends_with_prompt(&chunk) || self.ends_with_prompt(&stripped);
                        debug!(bytes = chunk.len(), eom, "Received chunk");
                        buffer.push_str(&chunk);
                    }
                    tokio::task::yield_now().await;
                }
                Err(ChannelError::Closed) => {
                    info!(bytes = buffer.len(), "Child exited while reading reply");
                    return RawResponse::new(buffer, CompletionReason::ChannelClosed);
                }
                Err(e) => {
                    debug!(error = %e, "Read failed, retrying");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    fn ends_with_prompt(&self, text: &str) -> bool {
        self.prompt_suffixes
            .iter()
            .any(|suffix| !suffix.is_empty() && text.ends_with(suffix.as_str()))
    }
}

/// A chunk that is only the "Thinking..." spinner, possibly with its glyph.
fn is_spinner(stripped: &str) -> bool {
    let trimmed = stripped.trim();
    trimmed.ends_with(SPINNER_TEXT) && trimmed.chars().count() <= SPINNER_TEXT.len() + 2
}
