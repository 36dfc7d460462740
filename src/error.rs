//! Error types, one per layer, each wrapping the layer below it.
//!
//! Mirrors the `#[derive(thiserror::Error)] enum FooError { Bar(#[from] ..) }`
//! layering used throughout the reference codebase's service crates.

use thiserror::Error;

/// Errors raised while framing bytes into JSON envelopes (C1).
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("length header is not 8 lowercase hex digits: {0:?}")]
    InvalidLength(Vec<u8>),

    #[error("frame body is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("malformed JSON envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the connection layer (C2).
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("request timed out")]
    Timeout,

    #[error("debuggee returned an error: {0}")]
    Remote(String),

    #[error("connection closed")]
    Closed,
}

/// Errors surfaced by the session layer (C3).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("no active stack frame")]
    NotReady,

    #[error("response body was missing an expected field: {0}")]
    MalformedResponse(&'static str),

    #[error("'{operation}' requires protocol version >= {required} (debuggee is at {actual})")]
    ProtocolVersionGate {
        operation: &'static str,
        required: u32,
        actual: u32,
    },
}
