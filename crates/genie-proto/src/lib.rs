//! # genie-proto
//!
//! Shared types and error definitions for the GenIE bridge.
//!
//! This crate provides the data model every other crate speaks:
//! - [`Request`] and its framing rules
//! - [`RawResponse`] with the reason the completion detector stopped reading
//! - [`ExtractedPayload`], the four-field GenIE_json reply contract
//! - [`SessionState`] for the session state machine
//! - The [`BridgeError`] taxonomy

mod error;
mod payload;
mod request;
mod response;
mod session;

pub use error::{BridgeError, BridgeResult, ChannelError, ExtractionError};
pub use payload::ExtractedPayload;
pub use request::{END_SENTINEL, INSTRUCTION_SUFFIX, Request, RequestKind, START_SENTINEL};
pub use response::{CompletionReason, RawResponse};
pub use session::SessionState;
