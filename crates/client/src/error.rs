//! Client error types.

use std::io;

use protocol::{MessageType, ProtocolError};
use thiserror::Error;

/// Errors returned by [`crate::Client`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The TCP connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Connecting took longer than the configured timeout.
    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    /// No response arrived within the request timeout. The connection is
    /// left in an unknown state and should be dropped.
    #[error("request timed out")]
    RequestTimeout,

    /// The server closed the connection instead of answering.
    #[error("server closed the connection")]
    Disconnected,

    /// The server answered `ACCESS_DENIED`.
    #[error("access denied: {0}")]
    Denied(String),

    /// The server answered `ERROR`.
    #[error("server error: {0}")]
    Failed(String),

    /// The server answered with a type that is not a response.
    #[error("unexpected response type {0}")]
    UnexpectedResponse(MessageType),

    /// Framing or payload encoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ClientError {
    /// Returns true if the server refused the request for lack of login or
    /// permission.
    pub fn is_denied(&self) -> bool {
        matches!(self, ClientError::Denied(_))
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
