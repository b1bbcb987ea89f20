//! # genie-adapters
//!
//! Terminal side of the genie bridge.
//!
//! This crate drives an interactive chat CLI through a pseudo-terminal:
//! - [`ChildProcessChannel`], the channel seam, with [`PtyChannel`] as the
//!   real implementation over `portable-pty`
//! - [`CompletionDetector`], which decides when a reply has finished
//! - [`Keyboard`] for the CLI's interactive pickers
//! - [`Session`], the login/launch/ask lifecycle
//!
//! ## Testing
//!
//! The [`testing`] module provides a scripted channel whose output follows
//! the tokio clock, so session tests run deterministically under paused time.

mod channel;
mod completion;
mod keyboard;
mod pty_channel;
mod session;
pub mod testing;

pub use channel::{
    ChannelSpawner, ChildProcessChannel, ExpectMatch, READ_SIZE, Utf8Decoder, compile_patterns,
};
pub use completion::CompletionDetector;
pub use keyboard::{KEY_DELAY, Key, Keyboard, STEP_DELAY, ctrl_code};
pub use pty_channel::{PtyChannel, PtyOptions, PtySpawner};
pub use session::Session;
