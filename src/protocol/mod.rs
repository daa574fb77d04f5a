//! Daemon <-> tracker wire protocol
//!
//! Framed MessagePack envelopes over a persistent TCP session. See
//! [`codec`] for the byte layout and [`messages`] for the catalogue.

pub mod codec;
pub mod messages;

pub use codec::{DaemonCodec, FrameCodec, TrackerCodec, WireMessage};
pub use messages::*;

use thiserror::Error;

/// A single frame that could not be turned into a message
///
/// The offending frame is dropped; the session stays open.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("unexpected message type: {0}")]
    UnexpectedType(MessageType),

    #[error("invalid {kind} payload: {reason}")]
    Payload { kind: MessageType, reason: String },

    #[error("encode failed: {0}")]
    Encode(String),
}
