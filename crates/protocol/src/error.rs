//! Error types for the protocol crate.

use std::time::Duration;

use thiserror::Error;

/// Protocol error type covering every way a frame can fail to move.
///
/// Variants fall into two groups. Protocol violations (the peer sent
/// something that is not a well-formed frame) and transport failures (the
/// byte stream itself broke). Both are fatal to the connection that produced
/// them; see [`ProtocolError::is_protocol_violation`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Framing errors
    /// The frame header could not be parsed or exceeded the size bound.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// The header named a message type ordinal that does not exist.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u32),

    /// The stream ended before the declared payload length arrived.
    #[error("incomplete message: expected {expected} payload bytes, received {received}")]
    IncompleteMessage {
        /// Declared payload length.
        expected: u64,
        /// Payload bytes actually received.
        received: u64,
    },

    /// A payload could not be split or decoded per its sub-format.
    #[error("bad encoding: {0}")]
    BadEncoding(String),

    /// A payload is larger than the configured limit.
    #[error("payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge {
        /// Declared or actual payload size.
        size: u64,
        /// Maximum allowed size.
        max: u64,
    },

    // Serialization errors
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    // Connection errors
    /// Connection was closed or reset by the peer.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Operation timed out.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// No frame started within the idle limit.
    #[error("no request within {0:?}")]
    Idle(Duration),

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ProtocolError {
    /// Returns true if the peer violated the wire protocol.
    ///
    /// The connection loop answers these with a best-effort `ERROR` frame
    /// before closing; transport failures are closed silently.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedHeader(_)
                | ProtocolError::UnknownMessageType(_)
                | ProtocolError::IncompleteMessage { .. }
                | ProtocolError::BadEncoding(_)
                | ProtocolError::PayloadTooLarge { .. }
        )
    }

    /// Returns true if the underlying byte stream failed.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::ConnectionClosed(_)
                | ProtocolError::Timeout(_)
                | ProtocolError::Transport(_)
        )
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::BadEncoding(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut => ProtocolError::Timeout(err.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => ProtocolError::ConnectionClosed(err.to_string()),
            _ => ProtocolError::Transport(err.to_string()),
        }
    }
}
