//! Per-connection request loop.
//!
//! A [`Connection`] owns one framed stream and one [`Session`]. It reads a
//! request, dispatches it and writes the response before reading the next
//! one, until the peer goes away or breaks the protocol.

use std::sync::Arc;
use std::time::Duration;

use protocol::{Framer, Message, ProtocolError};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::auth::UserStore;
use crate::files::FileStore;
use crate::router::Router;
use crate::session::Session;

/// Why a connection loop ended.
#[derive(Debug)]
pub enum ConnectionEnd {
    /// The peer closed the stream between requests.
    PeerClosed,
    /// No request arrived within the idle timeout.
    IdleTimeout,
    /// The peer sent something that is not a valid request frame. A
    /// best-effort `ERROR` was sent before closing.
    ProtocolViolation(ProtocolError),
    /// The stream failed. Nothing was sent.
    Transport(ProtocolError),
}

/// One client connection.
pub struct Connection<S, F, U> {
    id: Uuid,
    peer: String,
    framer: Framer<S>,
    router: Arc<Router<F, U>>,
    idle_timeout: Option<Duration>,
}

impl<S, F, U> Connection<S, F, U>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    F: FileStore,
    U: UserStore,
{
    pub fn new(framer: Framer<S>, peer: impl Into<String>, router: Arc<Router<F, U>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer: peer.into(),
            framer,
            router,
            idle_timeout: None,
        }
    }

    /// Close the connection if no request starts within `timeout`. A request
    /// that has started may take as long as it needs to arrive.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Serve requests until the connection ends.
    pub async fn run(self) -> ConnectionEnd {
        let span = info_span!("connection", id = %self.id, peer = %self.peer);
        async move {
            debug!("Connection opened");
            let end = self.serve().await;
            match &end {
                ConnectionEnd::PeerClosed => info!("Connection closed by peer"),
                ConnectionEnd::IdleTimeout => info!("Connection idle, closed"),
                ConnectionEnd::ProtocolViolation(e) => {
                    warn!(error = %e, "Connection closed after protocol violation")
                }
                ConnectionEnd::Transport(e) => info!(error = %e, "Connection lost"),
            }
            end
        }
        .instrument(span)
        .await
    }

    async fn serve(mut self) -> ConnectionEnd {
        let mut session = Session::default();

        loop {
            let request = match self.framer.receive_within(self.idle_timeout).await {
                Ok(Some(request)) => request,
                Ok(None) => return ConnectionEnd::PeerClosed,
                Err(ProtocolError::Idle(_)) => {
                    let _ = self.framer.shutdown().await;
                    return ConnectionEnd::IdleTimeout;
                }
                Err(e) => return self.fail(e).await,
            };

            let dispatched = match self.router.dispatch(session, request).await {
                Ok(dispatched) => dispatched,
                Err(e) => return self.fail(e).await,
            };
            session = dispatched.session;

            if let Err(e) = self.respond(&dispatched.response).await {
                return ConnectionEnd::Transport(e);
            }
        }
    }

    /// Send a response. A response too large for the peer is replaced by an
    /// `ERROR` saying so.
    async fn respond(&mut self, response: &Message) -> Result<(), ProtocolError> {
        match self.framer.send(response).await {
            Err(e @ ProtocolError::PayloadTooLarge { .. }) => {
                warn!(error = %e, "Response too large");
                self.framer.send(&Message::error(e.to_string())).await
            }
            result => result,
        }
    }

    async fn fail(&mut self, error: ProtocolError) -> ConnectionEnd {
        if !error.is_protocol_violation() {
            return ConnectionEnd::Transport(error);
        }

        if let Err(e) = self.framer.send(&Message::error(error.to_string())).await {
            debug!(error = %e, "Could not report protocol violation");
        }
        let _ = self.framer.shutdown().await;
        ConnectionEnd::ProtocolViolation(error)
    }
}
