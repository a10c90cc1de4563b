//! File operation handlers.
//!
//! Each handler decodes its payload, calls the file store and turns the
//! outcome into a response message. File store failures become `ERROR`
//! responses. The only error a handler returns is
//! [`ProtocolError::BadEncoding`], for payloads that do not match their
//! sub-format.

use std::sync::Arc;

use protocol::{decode_path, Message, ProtocolError, RenameRequest, UploadRequest};
use tracing::{info, warn};

use crate::files::{FileStore, FileStoreError};
use crate::session::Session;

/// Handlers for `DOWNLOAD_FILE`, `UPLOAD_FILE`, `DELETE_FILE` and `RENAME_FILE`.
pub struct Handlers<F> {
    files: Arc<F>,
}

impl<F: FileStore> Handlers<F> {
    pub fn new(files: Arc<F>) -> Self {
        Self { files }
    }

    /// Payload: path. Responds `OK` with the file's bytes.
    pub async fn download(&self, session: &Session, payload: &[u8]) -> Result<Message, ProtocolError> {
        let path = decode_path(payload)?;

        match self.files.read(path).await {
            Ok(data) => {
                info!(user = session.log_name(), path, size = data.len(), "Download");
                Ok(Message::ok_with(data))
            }
            Err(e) => Ok(failure(session, "download", e)),
        }
    }

    /// Payload: path, NUL, file bytes. Responds `OK` with an empty payload.
    pub async fn upload(&self, session: &Session, payload: Vec<u8>) -> Result<Message, ProtocolError> {
        let request = UploadRequest::decode(payload)?;

        match self.files.write(&request.path, &request.data).await {
            Ok(()) => {
                info!(
                    user = session.log_name(),
                    path = %request.path,
                    size = request.data.len(),
                    "Upload"
                );
                Ok(Message::ok())
            }
            Err(e) => Ok(failure(session, "upload", e)),
        }
    }

    /// Payload: path. Responds `OK` with an empty payload.
    pub async fn delete(&self, session: &Session, payload: &[u8]) -> Result<Message, ProtocolError> {
        let path = decode_path(payload)?;

        match self.files.delete(path).await {
            Ok(()) => {
                info!(user = session.log_name(), path, "Delete");
                Ok(Message::ok())
            }
            Err(e) => Ok(failure(session, "delete", e)),
        }
    }

    /// Payload: old path, NUL, new path. Responds `OK` with an empty payload.
    pub async fn rename(&self, session: &Session, payload: &[u8]) -> Result<Message, ProtocolError> {
        let request = RenameRequest::decode(payload)?;

        match self.files.rename(&request.from, &request.to).await {
            Ok(()) => {
                info!(
                    user = session.log_name(),
                    from = %request.from,
                    to = %request.to,
                    "Rename"
                );
                Ok(Message::ok())
            }
            Err(e) => Ok(failure(session, "rename", e)),
        }
    }
}

fn failure(session: &Session, operation: &str, error: FileStoreError) -> Message {
    match &error {
        FileStoreError::Io { .. } => {
            warn!(user = session.log_name(), operation, error = %error, "File operation failed")
        }
        _ => info!(user = session.log_name(), operation, error = %error, "File operation refused"),
    }
    Message::error(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use protocol::MessageType;

    use crate::auth::PermissionSet;

    /// In-memory file store that counts calls.
    #[derive(Default)]
    struct MockFileStore {
        files: Mutex<HashMap<String, Vec<u8>>>,
        calls: AtomicUsize,
    }

    impl MockFileStore {
        fn with_file(path: &str, data: &[u8]) -> Self {
            let store = Self::default();
            store
                .files
                .lock()
                .unwrap()
                .insert(path.to_string(), data.to_vec());
            store
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn get(&self, path: &str) -> Option<Vec<u8>> {
            self.files.lock().unwrap().get(path).cloned()
        }
    }

    impl FileStore for MockFileStore {
        async fn read(&self, path: &str) -> Result<Vec<u8>, FileStoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.get(path)
                .ok_or_else(|| FileStoreError::NotFound(path.to_string()))
        }

        async fn write(&self, path: &str, data: &[u8]) -> Result<(), FileStoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), data.to_vec());
            Ok(())
        }

        async fn delete(&self, path: &str) -> Result<(), FileStoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.files
                .lock()
                .unwrap()
                .remove(path)
                .map(|_| ())
                .ok_or_else(|| FileStoreError::NotFound(path.to_string()))
        }

        async fn rename(&self, from: &str, to: &str) -> Result<(), FileStoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut files = self.files.lock().unwrap();
            let data = files
                .remove(from)
                .ok_or_else(|| FileStoreError::NotFound(from.to_string()))?;
            files.insert(to.to_string(), data);
            Ok(())
        }
    }

    fn session() -> Session {
        Session::Authenticated {
            user: "tester".to_string(),
            permissions: PermissionSet::root(),
        }
    }

    #[tokio::test]
    async fn test_download_existing_file() {
        let handlers = Handlers::new(Arc::new(MockFileStore::with_file(
            "public/text.txt",
            b"contents",
        )));

        let response = handlers
            .download(&session(), b"public/text.txt")
            .await
            .unwrap();
        assert_eq!(response.message_type, MessageType::Ok);
        assert_eq!(response.payload(), b"contents");
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let handlers = Handlers::new(Arc::new(MockFileStore::default()));

        let response = handlers
            .download(&session(), b"public/text.txt")
            .await
            .unwrap();
        assert_eq!(response.message_type, MessageType::Error);
        assert!(response.payload_text().contains("public/text.txt"));
    }

    #[tokio::test]
    async fn test_download_bad_path_encoding() {
        let files = Arc::new(MockFileStore::default());
        let handlers = Handlers::new(files.clone());

        let err = handlers
            .download(&session(), &[0xc3, 0x28])
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::BadEncoding(_)));
        assert_eq!(files.calls(), 0);
    }

    #[tokio::test]
    async fn test_upload() {
        let files = Arc::new(MockFileStore::default());
        let handlers = Handlers::new(files.clone());

        let response = handlers
            .upload(&session(), b"public/new.txt\0hello".to_vec())
            .await
            .unwrap();
        assert_eq!(response, Message::ok());
        assert_eq!(files.get("public/new.txt").unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_upload_without_separator_never_reaches_store() {
        let files = Arc::new(MockFileStore::default());
        let handlers = Handlers::new(files.clone());

        let err = handlers
            .upload(&session(), b"public/new.txt hello".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::BadEncoding(_)));
        assert_eq!(files.calls(), 0);
    }

    #[tokio::test]
    async fn test_delete() {
        let files = Arc::new(MockFileStore::with_file("a.txt", b"x"));
        let handlers = Handlers::new(files.clone());

        let response = handlers.delete(&session(), b"a.txt").await.unwrap();
        assert_eq!(response, Message::ok());
        assert!(files.get("a.txt").is_none());

        let response = handlers.delete(&session(), b"a.txt").await.unwrap();
        assert_eq!(response.message_type, MessageType::Error);
        assert_eq!(response.payload_text(), "Could not find a.txt");
    }

    #[tokio::test]
    async fn test_rename() {
        let files = Arc::new(MockFileStore::with_file("old.txt", b"x"));
        let handlers = Handlers::new(files.clone());

        let response = handlers
            .rename(&session(), b"old.txt\0new.txt")
            .await
            .unwrap();
        assert_eq!(response, Message::ok());
        assert_eq!(files.get("new.txt").unwrap(), b"x");
        assert!(files.get("old.txt").is_none());
    }

    #[tokio::test]
    async fn test_rename_missing_source() {
        let handlers = Handlers::new(Arc::new(MockFileStore::default()));

        let response = handlers
            .rename(&session(), b"old.txt\0new.txt")
            .await
            .unwrap();
        assert_eq!(response.message_type, MessageType::Error);
        assert!(response.payload_text().contains("old.txt"));
    }

    #[tokio::test]
    async fn test_rename_malformed() {
        let files = Arc::new(MockFileStore::default());
        let handlers = Handlers::new(files.clone());

        let err = handlers.rename(&session(), b"old.txt").await.unwrap_err();
        assert!(matches!(err, ProtocolError::BadEncoding(_)));
        assert_eq!(files.calls(), 0);
    }
}
