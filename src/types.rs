//! Shared error type for the tracker
//!
//! Domain outcomes (unknown token, bad path, ...) never appear here: handlers
//! turn them into result codes on the wire. `TrackerError` is reserved for
//! infrastructure failures, which are logged and produce no reply.

use thiserror::Error;

use crate::protocol::ProtocolError;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
