//! # FileVault Client Library
//!
//! Async client for the FileVault daemon. A [`Client`] wraps one TCP
//! connection and exposes each request type as a method:
//!
//! ```rust,no_run
//! use client::Client;
//!
//! # #[tokio::main]
//! # async fn main() -> client::Result<()> {
//! let mut client = Client::connect("127.0.0.1:16239").await?;
//! client.login("tester", "secret").await?;
//! client.upload("public/new.txt", b"hello".to_vec()).await?;
//! let data = client.download("public/new.txt").await?;
//! assert_eq!(data, b"hello");
//! # Ok(())
//! # }
//! ```
//!
//! `ERROR` responses surface as [`ClientError::Failed`] and `ACCESS_DENIED`
//! as [`ClientError::Denied`]; the connection stays usable after either.

pub mod client;
pub mod error;

pub use client::{Client, ClientConfig, DEFAULT_CONNECT_TIMEOUT};
pub use error::{ClientError, Result};
