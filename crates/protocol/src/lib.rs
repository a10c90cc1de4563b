//! # FileVault Protocol Library
//!
//! This crate provides the wire protocol spoken between FileVault clients
//! and the FileVault daemon.
//!
//! ## Overview
//!
//! The protocol crate is the foundation of FileVault's communication layer,
//! providing:
//!
//! - **Message Definitions**: the closed set of request and response types
//! - **Framing**: a self-describing JSON header followed by a raw payload,
//!   moved over any async byte stream in bounded chunks
//! - **Payload Formats**: the path, upload, rename and credential encodings
//!   carried inside request payloads
//! - **Progress Reporting**: an optional observer notified once per chunk
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Request Payload Formats         │  path, path NUL data, JSON
//! ├─────────────────────────────────────────┤
//! │         Message (type + bytes)          │
//! ├─────────────────────────────────────────┤
//! │                Framing                  │  JSON header, 10 MiB chunks
//! ├─────────────────────────────────────────┤
//! │         Transport (TCP stream)          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Framer, Message, MessageType, UploadRequest};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (client, server) = tokio::io::duplex(64 * 1024);
//! let mut client = Framer::new(client);
//! let mut server = Framer::new(server);
//!
//! let payload = UploadRequest::new("public/new.txt", b"hello".to_vec())
//!     .encode()
//!     .unwrap();
//! client
//!     .send(&Message::new(MessageType::UploadFile, payload))
//!     .await
//!     .unwrap();
//!
//! let request = server.receive().await.unwrap().unwrap();
//! let upload = UploadRequest::decode(request.into_payload()).unwrap();
//! assert_eq!(upload.path, "public/new.txt");
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`message`]: Message and message type definitions
//! - [`framing`]: Header codec and the async [`Framer`]
//! - [`payload`]: Request payload sub-formats
//! - [`progress`]: Progress observer interface
//! - [`error`]: Error types

pub mod error;
pub mod framing;
pub mod message;
pub mod payload;
pub mod progress;

pub use error::{ProtocolError, Result};
pub use framing::{
    Framer, Header, CHUNK_SIZE, DEFAULT_MAX_PAYLOAD_SIZE, MAX_HEADER_SIZE, MIN_HEADER_SIZE,
};
pub use message::{Message, MessageType};
pub use payload::{decode_path, validate_path, Credentials, RenameRequest, UploadRequest, SEPARATOR};
pub use progress::{Direction, ProgressEvent, ProgressObserver, TracingProgress};
