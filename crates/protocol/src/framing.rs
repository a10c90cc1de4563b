//! Frame codec for header-prefixed messages over a byte stream.
//!
//! # Frame Format
//!
//! Each frame consists of:
//! - a header: compact JSON object `{"message_type":<u32>,"length":<u64>}`
//! - `length` bytes: raw payload, opaque to this layer
//!
//! # Incremental header parsing
//!
//! The header carries no length prefix of its own. The receiver first reads
//! [`MIN_HEADER_SIZE`] bytes (the shortest header that can exist) and then
//! extends the buffer one byte at a time until the bytes parse as a complete
//! header. A JSON object is self-delimiting, so no proper prefix of a header
//! is ever mistaken for a complete one, and the receiver never reads past the
//! closing brace into the payload. Buffers longer than [`MAX_HEADER_SIZE`]
//! are rejected.
//!
//! # Chunking
//!
//! Payloads move in chunks of at most [`CHUNK_SIZE`] bytes in both
//! directions. A progress event is emitted after every chunk if an observer
//! is attached.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result};
use crate::message::{Message, MessageType};
use crate::progress::{Direction, ProgressEvent, ProgressObserver};

/// Length of the shortest possible header, `{"message_type":0,"length":0}`.
pub const MIN_HEADER_SIZE: usize = 29;

/// Maximum header size in bytes.
pub const MAX_HEADER_SIZE: usize = 256;

/// Maximum number of bytes moved by a single transport read or write (10 MiB).
pub const CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Default maximum payload size (1 GiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u64 = 1024 * 1024 * 1024;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Type of the message that follows.
    pub message_type: MessageType,
    /// Payload length in bytes.
    pub length: u64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WireHeader {
    message_type: u32,
    length: u64,
}

impl Header {
    /// Build the header describing a message.
    pub fn for_message(message: &Message) -> Self {
        Self {
            message_type: message.message_type,
            length: message.len() as u64,
        }
    }

    /// Encode the header to its wire form.
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{{\"message_type\":{},\"length\":{}}}",
            self.message_type.ordinal(),
            self.length
        )
        .into_bytes()
    }

    /// Try to parse a header from the bytes read so far.
    ///
    /// Returns `Ok(None)` if `buf` is a valid but incomplete prefix of a
    /// header, so the caller should read another byte and retry.
    pub fn try_parse(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() > MAX_HEADER_SIZE {
            return Err(ProtocolError::MalformedHeader(format!(
                "header exceeds {} bytes",
                MAX_HEADER_SIZE
            )));
        }

        let wire: WireHeader = match serde_json::from_slice(buf) {
            Ok(wire) => wire,
            Err(e) if e.is_eof() => return Ok(None),
            Err(e) => return Err(ProtocolError::MalformedHeader(e.to_string())),
        };

        let message_type = MessageType::from_ordinal(wire.message_type)?;
        Ok(Some(Self {
            message_type,
            length: wire.length,
        }))
    }
}

/// Sends and receives [`Message`]s over a byte stream.
///
/// A framer owns its stream. Requests and responses on one framer are
/// strictly sequential; nothing here is shared between connections.
pub struct Framer<S> {
    stream: S,
    max_payload_size: u64,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl<S> Framer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a stream with the default payload limit and no observer.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            observer: None,
        }
    }

    /// Set the largest payload this framer will send or accept.
    pub fn with_max_payload_size(mut self, max_payload_size: u64) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    /// Attach a progress observer.
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The configured payload limit.
    pub fn max_payload_size(&self) -> u64 {
        self.max_payload_size
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Mutably borrow the underlying stream.
    ///
    /// Bytes written or read directly bypass framing.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Consume the framer and return the stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Write one message to the stream and flush it.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let length = message.len() as u64;
        if length > self.max_payload_size {
            return Err(ProtocolError::PayloadTooLarge {
                size: length,
                max: self.max_payload_size,
            });
        }

        let header = Header::for_message(message).encode();
        let mut frame = Vec::with_capacity(header.len() + message.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(message.payload());

        let total = frame.len() as u64;
        let mut sent = 0u64;
        for chunk in frame.chunks(CHUNK_SIZE) {
            self.stream.write_all(chunk).await?;
            sent += chunk.len() as u64;
            self.report(Direction::Sent, message.message_type, sent, total);
        }
        self.stream.flush().await?;

        Ok(())
    }

    /// Read one message from the stream.
    ///
    /// Returns `Ok(None)` if the peer closed the stream cleanly before
    /// sending any byte of a new header.
    pub async fn receive(&mut self) -> Result<Option<Message>> {
        self.receive_within(None).await
    }

    /// Read one message, waiting at most `idle` for its first byte.
    ///
    /// Fails with [`ProtocolError::Idle`] if nothing arrives in time. Once a
    /// frame has started, the rest of it is read without a deadline, so a
    /// slow but steady sender is never cut off.
    pub async fn receive_within(&mut self, idle: Option<Duration>) -> Result<Option<Message>> {
        let Some((header, header_len)) = self.read_header(idle).await? else {
            return Ok(None);
        };

        if header.length > self.max_payload_size {
            return Err(ProtocolError::PayloadTooLarge {
                size: header.length,
                max: self.max_payload_size,
            });
        }

        let total = header_len as u64 + header.length;
        let mut payload = Vec::new();
        while (payload.len() as u64) < header.length {
            let remaining = header.length - payload.len() as u64;
            let want = remaining.min(CHUNK_SIZE as u64);

            // Grows the buffer as bytes arrive rather than trusting the
            // declared length up front.
            let read = (&mut self.stream)
                .take(want)
                .read_to_end(&mut payload)
                .await?;
            if (read as u64) < want {
                return Err(ProtocolError::IncompleteMessage {
                    expected: header.length,
                    received: payload.len() as u64,
                });
            }

            self.report(
                Direction::Received,
                header.message_type,
                header_len as u64 + payload.len() as u64,
                total,
            );
        }

        if header.length == 0 {
            self.report(Direction::Received, header.message_type, total, total);
        }

        Ok(Some(Message::new(header.message_type, payload)))
    }

    /// Shut down the write half of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn read_header(&mut self, idle: Option<Duration>) -> Result<Option<(Header, usize)>> {
        let mut buf = vec![0u8; MIN_HEADER_SIZE];
        let mut filled = 0;
        while filled < MIN_HEADER_SIZE {
            let n = match idle {
                Some(limit) if filled == 0 => {
                    tokio::time::timeout(limit, self.stream.read(&mut buf[..]))
                        .await
                        .map_err(|_| ProtocolError::Idle(limit))??
                }
                _ => self.stream.read(&mut buf[filled..]).await?,
            };
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(truncated_header(filled));
            }
            filled += n;
        }

        let mut byte = [0u8; 1];
        loop {
            if let Some(header) = Header::try_parse(&buf)? {
                return Ok(Some((header, buf.len())));
            }
            if buf.len() >= MAX_HEADER_SIZE {
                return Err(ProtocolError::MalformedHeader(format!(
                    "no complete header within {} bytes",
                    MAX_HEADER_SIZE
                )));
            }

            if self.stream.read(&mut byte).await? == 0 {
                return Err(truncated_header(buf.len()));
            }
            buf.push(byte[0]);
        }
    }

    fn report(&self, direction: Direction, message_type: MessageType, transferred: u64, total: u64) {
        if let Some(observer) = &self.observer {
            observer.on_progress(ProgressEvent {
                direction,
                message_type,
                transferred,
                total,
            });
        }
    }
}

fn truncated_header(received: usize) -> ProtocolError {
    ProtocolError::MalformedHeader(format!("stream closed after {} header bytes", received))
}
