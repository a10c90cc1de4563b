//! Connection to a FileVault daemon.

use std::sync::Arc;
use std::time::Duration;

use protocol::{
    Credentials, Framer, Message, MessageType, ProgressObserver, RenameRequest, UploadRequest,
    DEFAULT_MAX_PAYLOAD_SIZE,
};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::error::{ClientError, Result};

/// Default timeout for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Time allowed for one request and its response. `None` waits forever,
    /// which suits large transfers.
    pub request_timeout: Option<Duration>,
    /// Largest payload accepted from or sent to the server.
    pub max_payload_size: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl ClientConfig {
    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// A connection to a FileVault daemon.
///
/// Requests are strictly sequential: each method sends one request and
/// waits for its response.
pub struct Client {
    framer: Framer<TcpStream>,
    request_timeout: Option<Duration>,
}

impl Client {
    /// Connect with the default configuration.
    pub async fn connect<A: ToSocketAddrs + std::fmt::Display>(addr: A) -> Result<Self> {
        Self::connect_with_config(addr, ClientConfig::default()).await
    }

    /// Connect with an explicit configuration.
    pub async fn connect_with_config<A: ToSocketAddrs + std::fmt::Display>(
        addr: A,
        config: ClientConfig,
    ) -> Result<Self> {
        let target = addr.to_string();
        let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ClientError::Connect {
                    addr: target,
                    source,
                })
            }
            Err(_) => return Err(ClientError::ConnectTimeout(target)),
        };
        let _ = stream.set_nodelay(true);
        debug!(addr = %target, "Connected");

        Ok(Self {
            framer: Framer::new(stream).with_max_payload_size(config.max_payload_size),
            request_timeout: config.request_timeout,
        })
    }

    /// Report transfer progress to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.framer = self.framer.with_observer(observer);
        self
    }

    /// Send one request and return the server's response as is.
    pub async fn request(&mut self, message: &Message) -> Result<Message> {
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, self.exchange(message))
                .await
                .map_err(|_| ClientError::RequestTimeout)?,
            None => self.exchange(message).await,
        }
    }

    async fn exchange(&mut self, message: &Message) -> Result<Message> {
        self.framer.send(message).await?;
        self.framer
            .receive()
            .await?
            .ok_or(ClientError::Disconnected)
    }

    /// Send a request and return the payload of an `OK` response.
    async fn call(&mut self, message_type: MessageType, payload: Vec<u8>) -> Result<Vec<u8>> {
        let response = self.request(&Message::new(message_type, payload)).await?;
        match response.message_type {
            MessageType::Ok => Ok(response.into_payload()),
            MessageType::Error => Err(ClientError::Failed(response.payload_text())),
            MessageType::AccessDenied => Err(ClientError::Denied(response.payload_text())),
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let payload = Credentials::new(username, password).encode()?;
        self.call(MessageType::Login, payload).await?;
        Ok(())
    }

    pub async fn logout(&mut self) -> Result<()> {
        self.call(MessageType::Logout, Vec::new()).await?;
        Ok(())
    }

    /// Fetch the contents of a remote file.
    pub async fn download(&mut self, path: &str) -> Result<Vec<u8>> {
        protocol::validate_path(path)?;
        self.call(MessageType::DownloadFile, path.as_bytes().to_vec())
            .await
    }

    /// Create or replace a remote file.
    pub async fn upload(&mut self, path: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        let payload = UploadRequest::new(path, data).encode()?;
        self.call(MessageType::UploadFile, payload).await?;
        Ok(())
    }

    pub async fn delete(&mut self, path: &str) -> Result<()> {
        protocol::validate_path(path)?;
        self.call(MessageType::DeleteFile, path.as_bytes().to_vec())
            .await?;
        Ok(())
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let payload = RenameRequest::new(from, to).encode()?;
        self.call(MessageType::RenameFile, payload).await?;
        Ok(())
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<()> {
        self.framer.shutdown().await?;
        Ok(())
    }
}
