//! Permission tags and per-user permission sets.
//!
//! `ROOT` implies every other tag.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A capability a user may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    /// Implies all other permissions.
    Root,
    DownloadFile,
    UploadFile,
    DeleteFile,
    RenameFile,
}

impl Permission {
    /// Every permission tag.
    pub const ALL: [Permission; 5] = [
        Permission::Root,
        Permission::DownloadFile,
        Permission::UploadFile,
        Permission::DeleteFile,
        Permission::RenameFile,
    ];

    /// The four file operation tags, without `ROOT`.
    pub const FILE_OPERATIONS: [Permission; 4] = [
        Permission::DownloadFile,
        Permission::UploadFile,
        Permission::DeleteFile,
        Permission::RenameFile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Root => "ROOT",
            Permission::DownloadFile => "DOWNLOAD_FILE",
            Permission::UploadFile => "UPLOAD_FILE",
            Permission::DeleteFile => "DELETE_FILE",
            Permission::RenameFile => "RENAME_FILE",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    /// Accepts `DOWNLOAD_FILE`, `download_file` and `download-file`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown permission '{}', expected one of: root, download_file, upload_file, delete_file, rename_file",
                    s
                )
            })
    }
}

/// A user's set of permission tags. Tags are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding only `ROOT`.
    pub fn root() -> Self {
        [Permission::Root].into_iter().collect()
    }

    /// Returns true if the set holds `permission` or `ROOT`.
    pub fn allows(&self, permission: Permission) -> bool {
        self.0.contains(&Permission::Root) || self.0.contains(&permission)
    }

    /// Returns true if the set holds exactly this tag, ignoring `ROOT`.
    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    /// Add a tag. Returns false if it was already present.
    pub fn insert(&mut self, permission: Permission) -> bool {
        self.0.insert(permission)
    }

    /// Remove a tag. Returns false if it was not present.
    pub fn remove(&mut self, permission: Permission) -> bool {
        self.0.remove(&permission)
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Permission> for PermissionSet {
    fn extend<I: IntoIterator<Item = Permission>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("(none)");
        }
        let names: Vec<&str> = self.iter().map(Permission::as_str).collect();
        f.write_str(&names.join(", "))
    }
}
