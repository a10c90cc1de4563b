//! Protocol message definitions for FileVault.
//!
//! A [`Message`] is one protocol unit: a [`MessageType`] plus an opaque
//! payload. The payload length is always derived from the payload itself and
//! never stored separately.

use std::fmt;

use crate::error::{ProtocolError, Result};

/// Closed set of message types carried on the wire.
///
/// Ordinals start at 1 and are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageType {
    // Responses
    /// Request succeeded.
    Ok = 1,
    /// Request failed at the operation level.
    Error = 2,
    /// Request was rejected by authentication or authorization.
    AccessDenied = 3,

    // Authentication
    /// Authenticate the connection.
    Login = 4,
    /// Drop the connection's identity.
    Logout = 5,

    // File operations
    /// Fetch a file's contents.
    DownloadFile = 6,
    /// Store a file's contents.
    UploadFile = 7,
    /// Remove a file.
    DeleteFile = 8,
    /// Move a file to a new path.
    RenameFile = 9,
}

impl MessageType {
    /// Every message type, in ordinal order.
    pub const ALL: [MessageType; 9] = [
        MessageType::Ok,
        MessageType::Error,
        MessageType::AccessDenied,
        MessageType::Login,
        MessageType::Logout,
        MessageType::DownloadFile,
        MessageType::UploadFile,
        MessageType::DeleteFile,
        MessageType::RenameFile,
    ];

    /// Map a wire ordinal to a message type.
    pub fn from_ordinal(ordinal: u32) -> Result<Self> {
        match ordinal {
            1 => Ok(MessageType::Ok),
            2 => Ok(MessageType::Error),
            3 => Ok(MessageType::AccessDenied),
            4 => Ok(MessageType::Login),
            5 => Ok(MessageType::Logout),
            6 => Ok(MessageType::DownloadFile),
            7 => Ok(MessageType::UploadFile),
            8 => Ok(MessageType::DeleteFile),
            9 => Ok(MessageType::RenameFile),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }

    /// The wire ordinal of this message type.
    #[inline]
    pub fn ordinal(self) -> u32 {
        self as u32
    }

    /// Returns true for the types a server sends back (OK, ERROR, ACCESS_DENIED).
    pub fn is_response(self) -> bool {
        matches!(
            self,
            MessageType::Ok | MessageType::Error | MessageType::AccessDenied
        )
    }

    /// Protocol name of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Ok => "OK",
            MessageType::Error => "ERROR",
            MessageType::AccessDenied => "ACCESS_DENIED",
            MessageType::Login => "LOGIN",
            MessageType::Logout => "LOGOUT",
            MessageType::DownloadFile => "DOWNLOAD_FILE",
            MessageType::UploadFile => "UPLOAD_FILE",
            MessageType::DeleteFile => "DELETE_FILE",
            MessageType::RenameFile => "RENAME_FILE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol unit.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    /// What kind of message this is.
    pub message_type: MessageType,
    /// Raw payload bytes, opaque to the framing layer.
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a message with the given type and payload.
    pub fn new(message_type: MessageType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            message_type,
            payload: payload.into(),
        }
    }

    /// An `OK` response with an empty payload.
    pub fn ok() -> Self {
        Self::new(MessageType::Ok, Vec::new())
    }

    /// An `OK` response carrying data.
    pub fn ok_with(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageType::Ok, payload)
    }

    /// An `ERROR` response with a human-readable explanation.
    pub fn error(text: impl AsRef<str>) -> Self {
        Self::new(MessageType::Error, text.as_ref().as_bytes().to_vec())
    }

    /// An `ACCESS_DENIED` response with a human-readable explanation.
    pub fn access_denied(text: impl AsRef<str>) -> Self {
        Self::new(MessageType::AccessDenied, text.as_ref().as_bytes().to_vec())
    }

    /// Payload length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns true if the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Borrow the payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// The payload decoded as UTF-8, with invalid sequences replaced.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

impl fmt::Debug for Message {
    // Payloads can be whole files; only show their size.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("message_type", &self.message_type)
            .field("length", &self.payload.len())
            .finish()
    }
}
