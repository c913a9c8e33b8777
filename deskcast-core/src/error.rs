//! Domain-specific error types for the deskcast engine.
//!
//! Per-tick and per-message failures are typed so callers can recover
//! locally: a failed capture skips one tick, a malformed message is
//! dropped, a failed write tears down one session.

use thiserror::Error;

use crate::session::SessionId;

/// The canonical error type for the deskcast engine.
#[derive(Debug, Error)]
pub enum DeskError {
    // ── Pipeline Errors ──────────────────────────────────────────
    /// The display or capture source could not produce a frame.
    #[error("capture failed: {0}")]
    CaptureFailure(String),

    /// The frame encoder rejected the pixel buffer.
    #[error("encode failed: {0}")]
    EncodeFailure(String),

    // ── Session Errors ───────────────────────────────────────────
    /// The registry is already holding the configured maximum.
    #[error("connection limit exceeded (max {max})")]
    ConnectionLimitExceeded { max: usize },

    /// A session lifecycle transition was attempted from the wrong phase.
    #[error("invalid session transition: {0}")]
    InvalidTransition(&'static str),

    /// The referenced session is not in the registry.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    // ── Protocol Errors ──────────────────────────────────────────
    /// An inbound message could not be decoded into an input event.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    // ── Transport Errors ─────────────────────────────────────────
    /// Writing to a viewer's transport failed.
    #[error("transport write failed: {0}")]
    TransportWrite(String),

    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Input Errors ─────────────────────────────────────────────
    /// The OS rejected an injected input event.
    #[error("input replay failed: {0}")]
    ReplayFailure(String),

    // ── Misc ─────────────────────────────────────────────────────
    /// Invalid configuration detected at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── DecodeError ──────────────────────────────────────────────────

/// Why an inbound viewer message was rejected.
///
/// Every variant means "drop the message and keep the session open".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload is not valid UTF-8 JSON.
    #[error("invalid json: {0}")]
    Json(String),

    /// The payload parsed, but the top level is not an object.
    #[error("message is not a json object")]
    NotAnObject,

    /// A field required by the message variant is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A field is present but has the wrong type or an unusable value.
    #[error("invalid field `{field}`: expected {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    /// The `type` discriminator names no known message.
    #[error("unknown message type `{0}`")]
    UnknownType(String),

    /// The `action` is not valid for the given `type`.
    #[error("unknown {kind} action `{action}`")]
    UnknownAction { kind: &'static str, action: String },
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for DeskError {
    fn from(s: String) -> Self {
        DeskError::Other(s)
    }
}

impl From<&str> for DeskError {
    fn from(s: &str) -> Self {
        DeskError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for DeskError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        DeskError::ChannelClosed
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for DeskError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        DeskError::TransportWrite(e.to_string())
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Json(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = DeskError::ConnectionLimitExceeded { max: 5 };
        assert!(e.to_string().contains("limit"));
        assert!(e.to_string().contains('5'));

        let e = DeskError::Decode(DecodeError::MissingField("x"));
        assert_eq!(e.to_string(), "decode error: missing field `x`");
    }

    #[test]
    fn from_string() {
        let e: DeskError = "something broke".into();
        assert!(matches!(e, DeskError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let e: DeskError = io_err.into();
        assert!(matches!(e, DeskError::Connection(_)));
    }

    #[test]
    fn from_decode_error() {
        let e: DeskError = DecodeError::UnknownType("gamepad".into()).into();
        assert!(matches!(e, DeskError::Decode(DecodeError::UnknownType(_))));
    }
}
