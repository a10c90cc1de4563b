//! # FileVault Daemon Library
//!
//! This crate provides the server side of FileVault: a TCP service that lets
//! authenticated users download, upload, delete and rename files below a
//! storage root.
//!
//! ## Overview
//!
//! - **Connection Loop**: one task per client, strictly request then response
//! - **Router**: fixed routing table with permission checks, fail-closed
//! - **Handlers**: decode request payloads and call the file store
//! - **User Store**: salted password hashes and permission sets in JSON
//! - **File Store**: sandboxed local files with per-path locking
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Server                             │
//! │              accept loop, connection limit                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │   Connection (Framer + Session)   ...   Connection          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                          Router                             │
//! │     LOGIN/LOGOUT ─▶ UserStore     file ops ─▶ Handlers      │
//! ├───────────────────────────┬─────────────────────────────────┤
//! │     JsonUserStore         │        LocalFileStore           │
//! └───────────────────────────┴─────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use daemon::{Config, JsonUserStore, LocalFileStore, Router, Server, ServerOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let files = LocalFileStore::open(&config.storage.root).await?;
//!     let users = JsonUserStore::open(&config.storage.users_file).await?;
//!     let router = Arc::new(Router::new(Arc::new(files), Arc::new(users)));
//!
//!     let server = Server::bind(
//!         config.server.bind_address.as_str(),
//!         router,
//!         ServerOptions::from_config(&config),
//!     )
//!     .await?;
//!     server.run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration file handling
//! - [`auth`]: Permissions and the user store
//! - [`files`]: File store interface and local backend
//! - [`session`]: Per-connection authentication state
//! - [`handlers`]: File operation handlers
//! - [`router`]: Request routing and authorization
//! - [`connection`]: Per-connection request loop
//! - [`server`]: TCP listener

pub mod auth;
pub mod config;
pub mod connection;
pub mod files;
pub mod handlers;
pub mod router;
pub mod server;
pub mod session;

pub use auth::{
    AuthError, AuthenticatedUser, JsonUserStore, Permission, PermissionSet, UserRecord, UserStore,
};
pub use config::Config;
pub use connection::{Connection, ConnectionEnd};
pub use files::{FileStore, FileStoreError, LocalFileStore};
pub use handlers::Handlers;
pub use router::{route, Dispatched, Operation, Route, Router, RouterError};
pub use server::{Server, ServerOptions};
pub use session::Session;
