//! Signaling server error types.
//!
//! Errors are grouped by where they originate:
//! - Timeouts waiting for an acknowledgement (`RequestTimeout`, `HandshakeTimeout`)
//! - Connection state (`ConnectionClosed`, `Draining`, `Transport`)
//! - Local protocol preconditions, never sent on the wire
//!   (`InvalidPipeRequest`, `ProducerNotFound`, `DataProducerNotFound`)
//! - Errors reported by a media node, propagated verbatim (`Remote`)
//! - Selection exhaustion (`NoMediaNodes`, `RoomClosed`)
//!
//! Internal details are logged server-side but not exposed to clients.

use thiserror::Error;

/// Signaling server error type.
///
/// `Clone` because a single in-flight pipe transport pairing result is shared
/// between every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SsError {
    /// A request was not acknowledged within the timeout window.
    #[error("Request timed out: {method}")]
    RequestTimeout { method: String },

    /// The media node did not signal readiness within the handshake window.
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// The media node announced it is draining.
    #[error("Media node is draining")]
    Draining,

    /// The connection closed (locally or by the remote side).
    #[error("Connection closed")]
    ConnectionClosed,

    /// Socket level failure (connect, send).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Error reported by the remote side.
    #[error("Remote error: {0}")]
    Remote(String),

    /// A remote response did not have the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Malformed pipe request (both or neither producer id given, same router).
    #[error("Invalid pipe request: {0}")]
    InvalidPipeRequest(String),

    /// Producer not found (or already closed).
    #[error("Producer not found: {0}")]
    ProducerNotFound(String),

    /// Data producer not found (or already closed).
    #[error("Data producer not found: {0}")]
    DataProducerNotFound(String),

    /// Operation on a closed entity.
    #[error("{0} closed")]
    Closed(&'static str),

    /// No media node could be selected.
    #[error("No media nodes available")]
    NoMediaNodes,

    /// The room (parent session) closed while provisioning.
    #[error("Room closed")]
    RoomClosed,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SsError {
    /// Whether this error is an acknowledgement timeout (as opposed to an
    /// error reported by the remote side).
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SsError::RequestTimeout { .. } | SsError::HandshakeTimeout
        )
    }

    /// Short, bounded label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SsError::RequestTimeout { .. } | SsError::HandshakeTimeout => "timeout",
            SsError::Draining => "draining",
            SsError::ConnectionClosed | SsError::Transport(_) => "connection",
            SsError::Remote(_) | SsError::InvalidResponse(_) => "remote",
            SsError::InvalidPipeRequest(_)
            | SsError::ProducerNotFound(_)
            | SsError::DataProducerNotFound(_)
            | SsError::Closed(_) => "precondition",
            SsError::NoMediaNodes | SsError::RoomClosed => "selection",
            SsError::Config(_) | SsError::Internal(_) => "internal",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SsError::NoMediaNodes
            | SsError::Draining
            | SsError::HandshakeTimeout
            | SsError::RequestTimeout { .. }
            | SsError::ConnectionClosed
            | SsError::Transport(_) => "No media available, please try again".to_string(),
            SsError::RoomClosed => "Room closed".to_string(),
            SsError::ProducerNotFound(_) | SsError::DataProducerNotFound(_) => {
                "Producer not found".to_string()
            }
            SsError::Closed(what) => format!("{what} closed"),
            SsError::Remote(_)
            | SsError::InvalidResponse(_)
            | SsError::InvalidPipeRequest(_)
            | SsError::Config(_)
            | SsError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}
