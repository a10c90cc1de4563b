//! Authentication and authorization.
//!
//! This module provides:
//! - The permission tags that gate file operations
//! - The user store interface consulted by `LOGIN`
//! - A JSON-backed user store with salted password hashes

pub mod permissions;
pub mod user_store;

pub use permissions::{Permission, PermissionSet};
pub use user_store::{
    default_users_path, AuthError, AuthenticatedUser, JsonUserStore, UserRecord, UserStore,
};
