//! The file store interface consumed by the operation handlers.

use std::future::Future;

use thiserror::Error;

/// Errors a file store can report. All of them are per-request and
/// recoverable; none of them end the connection.
#[derive(Debug, Error)]
pub enum FileStoreError {
    /// The requested file does not exist.
    #[error("Could not find {0}")]
    NotFound(String),

    /// The path is absolute, escapes the store, or is otherwise unusable.
    #[error("invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// The path names a directory, not a file.
    #[error("{0} is a directory")]
    IsADirectory(String),

    /// IO error.
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl FileStoreError {
    pub fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Map an IO error, turning `NotFound` into [`FileStoreError::NotFound`].
    pub fn from_io(path: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_string())
        } else {
            Self::Io {
                path: path.to_string(),
                source,
            }
        }
    }
}

/// Byte-oriented file access by logical path.
///
/// Paths are the relative path tokens carried in request payloads.
/// Implementations sandbox them and serialize concurrent operations on the
/// same path.
pub trait FileStore: Send + Sync {
    /// Read a whole file.
    fn read(&self, path: &str) -> impl Future<Output = Result<Vec<u8>, FileStoreError>> + Send;

    /// Create or replace a file.
    fn write(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl Future<Output = Result<(), FileStoreError>> + Send;

    /// Remove a file.
    fn delete(&self, path: &str) -> impl Future<Output = Result<(), FileStoreError>> + Send;

    /// Move a file to a new path, replacing any file already there.
    fn rename(
        &self,
        from: &str,
        to: &str,
    ) -> impl Future<Output = Result<(), FileStoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_names_path() {
        let err = FileStoreError::NotFound("public/text.txt".to_string());
        assert_eq!(err.to_string(), "Could not find public/text.txt");
    }

    #[test]
    fn test_from_io_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            FileStoreError::from_io("a.txt", io_err),
            FileStoreError::NotFound(path) if path == "a.txt"
        ));
    }

    #[test]
    fn test_from_io_other() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = FileStoreError::from_io("a.txt", io_err);
        assert!(matches!(err, FileStoreError::Io { .. }));
        assert!(err.to_string().contains("a.txt"));
    }

    #[test]
    fn test_invalid_path_message() {
        let err = FileStoreError::invalid_path("../etc/passwd", "escapes the storage root");
        assert_eq!(
            err.to_string(),
            "invalid path ../etc/passwd: escapes the storage root"
        );
    }
}
