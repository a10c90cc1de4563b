//! Request payload sub-formats.
//!
//! | Message         | Payload                                  |
//! |-----------------|------------------------------------------|
//! | `LOGIN`         | JSON `{"username": .., "password": ..}`  |
//! | `DOWNLOAD_FILE` | path                                     |
//! | `DELETE_FILE`   | path                                     |
//! | `UPLOAD_FILE`   | path, `0x00`, raw file bytes             |
//! | `RENAME_FILE`   | old path, `0x00`, new path               |
//!
//! Paths are UTF-8, non-empty and never contain a NUL byte. Anything else is
//! [`ProtocolError::BadEncoding`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Byte separating the fields of multi-part payloads.
pub const SEPARATOR: u8 = 0x00;

/// Check that a path token is well-formed.
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(ProtocolError::BadEncoding("empty path".to_string()));
    }
    if path.as_bytes().contains(&SEPARATOR) {
        return Err(ProtocolError::BadEncoding(
            "path contains a NUL byte".to_string(),
        ));
    }
    Ok(())
}

/// Decode a payload that consists of a single path.
pub fn decode_path(bytes: &[u8]) -> Result<&str> {
    let path = std::str::from_utf8(bytes)
        .map_err(|e| ProtocolError::BadEncoding(format!("path is not valid UTF-8: {}", e)))?;
    validate_path(path)?;
    Ok(path)
}

/// `UPLOAD_FILE` payload.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub path: String,
    pub data: Vec<u8>,
}

impl UploadRequest {
    pub fn new(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }

    /// Encode as `path NUL data`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        validate_path(&self.path)?;
        let mut payload = Vec::with_capacity(self.path.len() + 1 + self.data.len());
        payload.extend_from_slice(self.path.as_bytes());
        payload.push(SEPARATOR);
        payload.extend_from_slice(&self.data);
        Ok(payload)
    }

    /// Split a payload on its first NUL byte.
    ///
    /// Takes the payload by value so the file bytes are reused in place.
    pub fn decode(mut payload: Vec<u8>) -> Result<Self> {
        let split = payload
            .iter()
            .position(|&b| b == SEPARATOR)
            .ok_or_else(|| {
                ProtocolError::BadEncoding("upload payload has no path separator".to_string())
            })?;

        let mut path_bytes: Vec<u8> = payload.drain(..=split).collect();
        path_bytes.pop();

        let path = String::from_utf8(path_bytes)
            .map_err(|e| ProtocolError::BadEncoding(format!("path is not valid UTF-8: {}", e)))?;
        validate_path(&path)?;

        Ok(Self {
            path,
            data: payload,
        })
    }
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("path", &self.path)
            .field("size", &self.data.len())
            .finish()
    }
}

/// `RENAME_FILE` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameRequest {
    pub from: String,
    pub to: String,
}

impl RenameRequest {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Encode as `from NUL to`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        validate_path(&self.from)?;
        validate_path(&self.to)?;
        let mut payload = Vec::with_capacity(self.from.len() + 1 + self.to.len());
        payload.extend_from_slice(self.from.as_bytes());
        payload.push(SEPARATOR);
        payload.extend_from_slice(self.to.as_bytes());
        Ok(payload)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let split = payload
            .iter()
            .position(|&b| b == SEPARATOR)
            .ok_or_else(|| {
                ProtocolError::BadEncoding("rename payload has no path separator".to_string())
            })?;

        let from = decode_path(&payload[..split])?;
        let to = decode_path(&payload[split + 1..])?;
        Ok(Self::new(from, to))
    }
}

/// `LOGIN` payload.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| ProtocolError::BadEncoding(format!("invalid credentials: {}", e)))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_path() {
        assert_eq!(decode_path(b"public/text.txt").unwrap(), "public/text.txt");
    }

    #[test]
    fn test_decode_path_rejects_bad_input() {
        assert!(matches!(decode_path(b""), Err(ProtocolError::BadEncoding(_))));
        assert!(matches!(
            decode_path(b"a\0b"),
            Err(ProtocolError::BadEncoding(_))
        ));
        assert!(matches!(
            decode_path(&[0xff, 0xfe]),
            Err(ProtocolError::BadEncoding(_))
        ));
    }

    #[test]
    fn test_upload_decode() {
        let request = UploadRequest::decode(b"public/new.txt\0hello".to_vec()).unwrap();
        assert_eq!(request.path, "public/new.txt");
        assert_eq!(request.data, b"hello");
    }

    #[test]
    fn test_upload_splits_on_first_nul() {
        let request = UploadRequest::decode(b"bin/blob\0\0\x01\0".to_vec()).unwrap();
        assert_eq!(request.path, "bin/blob");
        assert_eq!(request.data, b"\0\x01\0");
    }

    #[test]
    fn test_upload_empty_body() {
        let request = UploadRequest::decode(b"empty.txt\0".to_vec()).unwrap();
        assert_eq!(request.path, "empty.txt");
        assert!(request.data.is_empty());
    }

    #[test]
    fn test_upload_without_separator() {
        let err = UploadRequest::decode(b"public/new.txt hello".to_vec()).unwrap_err();
        assert!(matches!(err, ProtocolError::BadEncoding(_)));
    }

    #[test]
    fn test_upload_empty_path() {
        let err = UploadRequest::decode(b"\0hello".to_vec()).unwrap_err();
        assert!(matches!(err, ProtocolError::BadEncoding(_)));
    }

    #[test]
    fn test_upload_encode() {
        let payload = UploadRequest::new("public/new.txt", b"hello".to_vec())
            .encode()
            .unwrap();
        assert_eq!(payload, b"public/new.txt\0hello");
    }

    #[test]
    fn test_upload_debug_hides_data() {
        let request = UploadRequest::new("a.bin", vec![7u8; 1000]);
        let debug = format!("{:?}", request);
        assert!(debug.contains("1000"));
        assert!(!debug.contains("7, 7"));
    }

    #[test]
    fn test_rename_decode() {
        let request = RenameRequest::decode(b"old.txt\0archive/new.txt").unwrap();
        assert_eq!(request.from, "old.txt");
        assert_eq!(request.to, "archive/new.txt");
    }

    #[test]
    fn test_rename_rejects_extra_separator() {
        let err = RenameRequest::decode(b"a\0b\0c").unwrap_err();
        assert!(matches!(err, ProtocolError::BadEncoding(_)));
    }

    #[test]
    fn test_rename_rejects_missing_target() {
        assert!(RenameRequest::decode(b"a.txt").is_err());
        assert!(RenameRequest::decode(b"a.txt\0").is_err());
    }

    #[test]
    fn test_rename_encode_rejects_nul() {
        assert!(RenameRequest::new("a\0", "b").encode().is_err());
        assert_eq!(
            RenameRequest::new("a", "b").encode().unwrap(),
            b"a\0b".to_vec()
        );
    }

    #[test]
    fn test_credentials_wire_format() {
        let credentials = Credentials::new("tester", "secret");
        let encoded = credentials.encode().unwrap();
        assert_eq!(
            encoded,
            br#"{"username":"tester","password":"secret"}"#.to_vec()
        );
        assert_eq!(Credentials::decode(&encoded).unwrap(), credentials);
    }

    #[test]
    fn test_credentials_reject_garbage() {
        assert!(matches!(
            Credentials::decode(b"tester:secret"),
            Err(ProtocolError::BadEncoding(_))
        ));
        assert!(Credentials::decode(br#"{"username":"tester"}"#).is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let debug = format!("{:?}", Credentials::new("root", "hunter2"));
        assert!(debug.contains("root"));
        assert!(!debug.contains("hunter2"));
    }
}
