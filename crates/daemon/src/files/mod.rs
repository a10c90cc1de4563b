//! File storage for the operation handlers.
//!
//! This module provides:
//! - The [`FileStore`] interface (read, write, delete, rename)
//! - [`LocalFileStore`], which serves files from one directory on disk
//!
//! # Security
//!
//! Client paths are relative tokens. Absolute paths and `..` components are
//! rejected, and resolved paths are checked against the canonical storage
//! root so symlinks cannot lead outside it.

pub mod local;
pub mod store;

pub use local::LocalFileStore;
pub use store::{FileStore, FileStoreError};
