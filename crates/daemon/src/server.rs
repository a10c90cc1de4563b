//! TCP listener.
//!
//! The server accepts connections until its shutdown token is cancelled and
//! runs each one as its own task. At most `max_connections` are served at
//! once; further clients stay in the listen backlog until a slot frees up.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use protocol::{Framer, TracingProgress, DEFAULT_MAX_PAYLOAD_SIZE};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::auth::UserStore;
use crate::config::Config;
use crate::connection::Connection;
use crate::files::FileStore;
use crate::router::Router;

/// Pause after the first failed `accept`.
const INITIAL_ACCEPT_BACKOFF_MS: u64 = 10;
/// Longest pause between failed `accept` calls.
const MAX_ACCEPT_BACKOFF_MS: u64 = 1_000;

/// Delay between retries while `accept` keeps failing, e.g. when the
/// process is out of file descriptors. Doubles per failure and resets on
/// the next successful accept.
#[derive(Debug)]
struct AcceptBackoff {
    next: Duration,
}

impl AcceptBackoff {
    fn new() -> Self {
        Self {
            next: Duration::from_millis(INITIAL_ACCEPT_BACKOFF_MS),
        }
    }

    fn failed(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(Duration::from_millis(MAX_ACCEPT_BACKOFF_MS));
        delay
    }

    fn reset(&mut self) {
        self.next = Duration::from_millis(INITIAL_ACCEPT_BACKOFF_MS);
    }
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    pub max_connections: usize,
    pub idle_timeout: Option<Duration>,
    pub max_payload_size: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_connections: 64,
            idle_timeout: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl ServerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_connections: config.server.max_connections,
            idle_timeout: config.idle_timeout(),
            max_payload_size: config.protocol.max_payload_size,
        }
    }
}

/// A bound FileVault server.
pub struct Server<F, U> {
    listener: TcpListener,
    router: Arc<Router<F, U>>,
    options: ServerOptions,
}

impl<F, U> Server<F, U>
where
    F: FileStore + 'static,
    U: UserStore + 'static,
{
    /// Bind the listening socket.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        router: Arc<Router<F, U>>,
        options: ServerOptions,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            router,
            options,
        })
    }

    /// The address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` is cancelled, then wait for the
    /// connection tasks to stop.
    pub async fn run(self, shutdown: CancellationToken) -> io::Result<()> {
        let addr = self.local_addr()?;
        info!(
            %addr,
            max_connections = self.options.max_connections,
            "Listening"
        );

        let slots = Arc::new(Semaphore::new(self.options.max_connections));
        let tasks = TaskTracker::new();
        let mut backoff = AcceptBackoff::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        let delay = backoff.failed();
                        warn!(error = %e, retry_in = ?delay, "Accept failed");
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(delay) => continue,
                        }
                    }
                },
            };
            backoff.reset();

            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, error = %e, "Could not set TCP_NODELAY");
            }

            let framer = Framer::new(stream)
                .with_max_payload_size(self.options.max_payload_size)
                .with_observer(Arc::new(TracingProgress));
            let connection = Connection::new(framer, peer.to_string(), Arc::clone(&self.router))
                .with_idle_timeout(self.options.idle_timeout);
            let shutdown = shutdown.clone();

            tasks.spawn(async move {
                let _permit = permit;
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = connection.run() => {}
                }
            });
        }

        info!(active = tasks.len(), "Shutting down");
        tasks.close();
        tasks.wait().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{Credentials, Message, MessageType};
    use tempfile::TempDir;
    use tokio::net::TcpStream;

    use crate::auth::{JsonUserStore, PermissionSet};
    use crate::files::LocalFileStore;

    async fn start_server(
        temp_dir: &TempDir,
        options: ServerOptions,
    ) -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<io::Result<()>>) {
        let files = LocalFileStore::open(temp_dir.path().join("files"))
            .await
            .unwrap();
        let users = JsonUserStore::new(temp_dir.path().join("users.json"));
        users
            .add_user("root", "rootpw", PermissionSet::root())
            .await
            .unwrap();

        let router = Arc::new(Router::new(Arc::new(files), Arc::new(users)));
        let server = Server::bind("127.0.0.1:0", router, options).await.unwrap();
        let addr = server.local_addr().unwrap();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.run(shutdown.clone()));
        (addr, shutdown, handle)
    }

    async fn connect(addr: SocketAddr) -> Framer<TcpStream> {
        Framer::new(TcpStream::connect(addr).await.unwrap())
    }

    fn login() -> Message {
        Message::new(
            MessageType::Login,
            Credentials::new("root", "rootpw").encode().unwrap(),
        )
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.server.max_connections = 3;
        config.server.idle_timeout_secs = 30;

        let options = ServerOptions::from_config(&config);
        assert_eq!(options.max_connections, 3);
        assert_eq!(options.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.max_payload_size, config.protocol.max_payload_size);
    }

    #[test]
    fn test_accept_backoff_grows_and_resets() {
        let mut backoff = AcceptBackoff::new();
        assert_eq!(backoff.failed(), Duration::from_millis(10));
        assert_eq!(backoff.failed(), Duration::from_millis(20));
        assert_eq!(backoff.failed(), Duration::from_millis(40));

        for _ in 0..20 {
            backoff.failed();
        }
        assert_eq!(backoff.failed(), Duration::from_millis(MAX_ACCEPT_BACKOFF_MS));

        backoff.reset();
        assert_eq!(backoff.failed(), Duration::from_millis(INITIAL_ACCEPT_BACKOFF_MS));
    }

    #[tokio::test]
    async fn test_serves_connection() {
        let temp_dir = TempDir::new().unwrap();
        let (addr, shutdown, handle) = start_server(&temp_dir, ServerOptions::default()).await;

        let mut client = connect(addr).await;
        client.send(&login()).await.unwrap();
        assert_eq!(client.receive().await.unwrap().unwrap(), Message::ok());

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_connections() {
        let temp_dir = TempDir::new().unwrap();
        let (addr, shutdown, handle) = start_server(&temp_dir, ServerOptions::default()).await;

        let mut client = connect(addr).await;
        client.send(&login()).await.unwrap();
        assert_eq!(client.receive().await.unwrap().unwrap(), Message::ok());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(client.receive().await.unwrap_or(None).is_none());
    }

    #[tokio::test]
    async fn test_connection_limit_queues_excess_clients() {
        let temp_dir = TempDir::new().unwrap();
        let options = ServerOptions {
            max_connections: 1,
            ..ServerOptions::default()
        };
        let (addr, shutdown, handle) = start_server(&temp_dir, options).await;

        let mut first = connect(addr).await;
        first.send(&login()).await.unwrap();
        assert_eq!(first.receive().await.unwrap().unwrap(), Message::ok());

        let mut second = connect(addr).await;
        second.send(&login()).await.unwrap();
        let waiting = tokio::time::timeout(Duration::from_millis(200), second.receive()).await;
        assert!(waiting.is_err(), "second client served while the slot was taken");

        drop(first);
        let response = tokio::time::timeout(Duration::from_secs(5), second.receive())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(response, Message::ok());

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
