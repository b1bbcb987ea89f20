//! The child-process channel abstraction.
//!
//! A channel owns one child process attached to a terminal and exposes the
//! primitives the session is built from: line and raw writes, non-blocking
//! reads, pattern expectation, and idempotent termination.

use std::time::Duration;

use async_trait::async_trait;
use genie_core::{BridgeConfig, strip_ansi};
use genie_proto::ChannelError;
use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Bytes requested per read by the default helpers.
pub const READ_SIZE: usize = 1024;

const EXPECT_POLL: Duration = Duration::from_millis(20);
const FLUSH_POLL: Duration = Duration::from_millis(50);

/// Result of [`ChildProcessChannel::expect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectMatch {
    /// Index of the pattern that matched.
    pub index: usize,
    /// ANSI-stripped text before the match.
    pub before: String,
    /// The matched text.
    pub matched: String,
}

/// A child process reached through a pseudo-terminal.
#[async_trait]
pub trait ChildProcessChannel: Send {
    /// Writes bytes verbatim.
    fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ChannelError>;

    /// Writes `line` followed by a newline.
    fn send(&mut self, line: &str) -> Result<(), ChannelError> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.send_raw(&bytes)
    }

    /// Returns whatever output is available without waiting.
    ///
    /// An empty string means nothing is available right now. Invalid UTF-8
    /// is skipped. [`ChannelError::Closed`] is returned once the child's
    /// output has ended and everything buffered has been read.
    fn read_nonblocking(&mut self, max_bytes: usize) -> Result<String, ChannelError>;

    /// Returns text to the front of the read queue.
    fn push_back(&mut self, text: &str);

    fn is_alive(&mut self) -> bool;

    /// Stops the child. A no-op when it is already gone.
    async fn terminate(&mut self);

    /// Terminates the child if needed and releases the terminal.
    ///
    /// Calling it more than once is a no-op.
    async fn close(&mut self);

    /// Reads and discards pending output.
    ///
    /// Stops after `max_empty_reads` consecutive empty reads or once
    /// `flush_timeout` has elapsed. Returns the discarded text.
    async fn clear_buffer(&mut self, flush_timeout: Duration, max_empty_reads: u32) -> String {
        let deadline = Instant::now() + flush_timeout;
        let mut flushed = String::new();
        let mut empty_reads = 0;

        loop {
            if Instant::now() > deadline {
                debug!(bytes = flushed.len(), "Flush timeout reached");
                break;
            }
            match self.read_nonblocking(READ_SIZE) {
                Ok(chunk) if !chunk.is_empty() => {
                    debug!(bytes = chunk.len(), "Flushed pending output");
                    flushed.push_str(&chunk);
                    empty_reads = 0;
                    tokio::task::yield_now().await;
                }
                Ok(_) => {
                    empty_reads += 1;
                    if empty_reads >= max_empty_reads {
                        break;
                    }
                    tokio::time::sleep(FLUSH_POLL).await;
                }
                Err(e) => {
                    debug!(error = %e, "Stopped flushing");
                    break;
                }
            }
        }

        flushed
    }

    /// Reads until one of `patterns` matches the ANSI-stripped output.
    ///
    /// When several patterns match, the earliest match wins. Text after the
    /// match is pushed back for the next read.
    async fn expect(
        &mut self,
        patterns: &[Regex],
        timeout: Duration,
    ) -> Result<ExpectMatch, ChannelError> {
        let deadline = Instant::now() + timeout;
        let mut raw = String::new();
        let describe = || -> Vec<String> {
            patterns.iter().map(|p| p.as_str().to_string()).collect()
        };

        loop {
            if Instant::now() >= deadline {
                info!(timeout_secs = timeout.as_secs_f64(), "Timed out waiting for output");
                return Err(ChannelError::ExpectTimeout {
                    patterns: describe(),
                    timeout,
                });
            }
            match self.read_nonblocking(READ_SIZE) {
                Ok(chunk) if !chunk.is_empty() => {
                    raw.push_str(&chunk);
                    let text = strip_ansi(&raw);
                    if let Some((index, start, end)) = earliest_match(patterns, &text) {
                        debug!(pattern = %patterns[index], "Expected pattern matched");
                        self.push_back(&text[end..]);
                        return Ok(ExpectMatch {
                            index,
                            before: text[..start].to_string(),
                            matched: text[start..end].to_string(),
                        });
                    }
                    tokio::task::yield_now().await;
                }
                Ok(_) => tokio::time::sleep(EXPECT_POLL).await,
                Err(ChannelError::Closed) => {
                    return Err(ChannelError::Eof {
                        patterns: describe(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn earliest_match(patterns: &[Regex], text: &str) -> Option<(usize, usize, usize)> {
    patterns
        .iter()
        .enumerate()
        .filter_map(|(index, pattern)| pattern.find(text).map(|m| (index, m.start(), m.end())))
        .min_by_key(|&(index, start, _)| (start, index))
}

/// Compiles expect patterns, naming the bad one on failure.
pub fn compile_patterns(patterns: &[&str]) -> Result<Vec<Regex>, ChannelError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| ChannelError::Pattern {
                pattern: (*p).to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Creates channels for a session.
pub trait ChannelSpawner: Send + Sync {
    fn spawn(&self, config: &BridgeConfig) -> Result<Box<dyn ChildProcessChannel>, ChannelError>;
}

/// Incremental UTF-8 decoder.
///
/// Invalid sequences are dropped; an incomplete sequence at the end of the
/// input is held until more bytes arrive.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8.
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => rest = &after[len..],
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }

    /// Whether bytes of an incomplete character are being held.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedChannel;

    const MS: Duration = Duration::from_millis(1);

    /// Has output ready on every read until `until`.
    struct Chatty {
        until: Instant,
        reads: usize,
    }

    #[async_trait]
    impl ChildProcessChannel for Chatty {
        fn send_raw(&mut self, _bytes: &[u8]) -> Result<(), ChannelError> {
            Ok(())
        }

        fn read_nonblocking(&mut self, _max_bytes: usize) -> Result<String, ChannelError> {
            self.reads += 1;
            if Instant::now() < self.until {
                Ok("x".to_string())
            } else {
                Ok(String::new())
            }
        }

        fn push_back(&mut self, _text: &str) {}

        fn is_alive(&mut self) -> bool {
            true
        }

        async fn terminate(&mut self) {}

        async fn close(&mut self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_buffer_stops_after_empty_reads() {
        let mut channel = ScriptedChannel::new()
            .with_output(Duration::ZERO, "stale reply\r\n> ")
            .with_output(2000 * MS, "late");
        let start = Instant::now();

        let flushed = channel.clear_buffer(Duration::from_secs(10), 3).await;

        assert_eq!(flushed, "stale reply\r\n> ");
        assert!(start.elapsed() < 500 * MS, "flush ran for {:?}", start.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_buffer_stops_at_flush_timeout_while_output_continues() {
        let mut channel = ScriptedChannel::new();
        for i in 0..100u32 {
            channel = channel.with_output(40 * MS * i, "\u{280b} Thinking...");
        }
        let start = Instant::now();

        let flushed = channel.clear_buffer(200 * MS, 1000).await;

        let waited = start.elapsed();
        assert!(waited >= 200 * MS, "stopped early: {waited:?}");
        assert!(waited < 400 * MS, "flush ignored its timeout: {waited:?}");
        assert!(flushed.contains("Thinking..."));
    }

    #[tokio::test]
    async fn test_clear_buffer_yields_to_chatty_child() {
        let mut channel = Chatty {
            until: Instant::now() + Duration::from_secs(3),
            reads: 0,
        };
        let start = Instant::now();

        let flushed = channel.clear_buffer(200 * MS, 5).await;

        let waited = start.elapsed();
        assert!(waited < Duration::from_secs(1), "flush ran for {waited:?}");
        assert_eq!(flushed.len(), channel.reads);
    }

    #[test]
    fn test_decoder_passes_valid_text() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode("héllo ✅".as_bytes()), "héllo ✅");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_decoder_skips_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xffb\xc3\x28c"), "ab(c");
    }

    #[test]
    fn test_decoder_holds_split_character() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "✅ok".as_bytes();
        assert_eq!(decoder.decode(&bytes[..2]), "");
        assert!(decoder.has_pending());
        assert_eq!(decoder.decode(&bytes[2..]), "✅ok");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_earliest_match_wins() {
        let patterns = compile_patterns(&["Region", "Enter"]).unwrap();
        assert_eq!(earliest_match(&patterns, "Enter Region"), Some((1, 0, 5)));
        assert_eq!(earliest_match(&patterns, "nothing"), None);
    }

    #[test]
    fn test_bad_pattern_is_named() {
        let err = compile_patterns(&["ok", "(bad"]).unwrap_err();
        assert!(matches!(err, ChannelError::Pattern { ref pattern, .. } if pattern == "(bad"));
    }
}
