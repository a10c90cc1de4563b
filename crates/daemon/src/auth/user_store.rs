//! Persistent user storage.
//!
//! This module provides the [`UserStore`] interface consulted by `LOGIN`, and
//! [`JsonUserStore`], which keeps users, salted password hashes and
//! permissions in a JSON file at `~/.local/share/filevault/users.json`.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use protocol::Credentials;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;

use super::permissions::{Permission, PermissionSet};

/// Salt length in bytes.
const SALT_LEN: usize = 16;

/// Salt and hash checked when the username is unknown. No password hashes to
/// all zeros, so the check always fails, after the same work as a real one.
const UNKNOWN_USER_SALT: &str = "00000000000000000000000000000000";
const UNKNOWN_USER_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown user or wrong password. The two are deliberately not told apart.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The backing store could not be consulted.
    #[error("user store unavailable: {0}")]
    Unavailable(String),
}

/// Identity and permissions established by a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub username: String,
    pub permissions: PermissionSet,
}

/// Source of user identities.
pub trait UserStore: Send + Sync {
    /// Check credentials and return the user's identity and permissions.
    fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = std::result::Result<AuthenticatedUser, AuthError>> + Send;
}

/// A stored user entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    /// Hex-encoded random salt.
    pub salt: String,
    /// Hex-encoded SHA-256 of salt followed by password.
    pub password_hash: String,
    pub permissions: PermissionSet,
}

impl UserRecord {
    /// Create a record, hashing `password` with a fresh salt.
    pub fn new(username: impl Into<String>, password: &str, permissions: PermissionSet) -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);

        Self {
            username: username.into(),
            salt: hex::encode(salt),
            password_hash: hash_password(&salt, password),
            permissions,
        }
    }

    /// Check a candidate password against the stored hash.
    pub fn verify_password(&self, password: &str) -> bool {
        let Ok(salt) = hex::decode(&self.salt) else {
            return false;
        };
        constant_time_eq(
            hash_password(&salt, password).as_bytes(),
            self.password_hash.as_bytes(),
        )
    }
}

/// Stand-in record for usernames that are not in the store.
fn unknown_user() -> UserRecord {
    UserRecord {
        username: String::new(),
        salt: UNKNOWN_USER_SALT.to_string(),
        password_hash: UNKNOWN_USER_HASH.to_string(),
        permissions: PermissionSet::new(),
    }
}

fn hash_password(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Wrapper for serializing the user store.
#[derive(Debug, Serialize, Deserialize)]
struct UserStoreData {
    /// Version of the store format (for future migrations).
    version: u32,
    /// The users in the store.
    users: Vec<UserRecord>,
}

/// Returns the default users file path.
pub fn default_users_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filevault")
        .join("users.json")
}

/// JSON-file-backed user store.
///
/// One async mutex guards the in-memory map for the whole load, mutate and
/// save cycle. A mutation is applied to a copy of the map, and the copy
/// replaces the map only once it has been written to disk.
pub struct JsonUserStore {
    /// The path to the JSON file.
    path: PathBuf,
    /// Users keyed by username.
    users: Mutex<BTreeMap<String, UserRecord>>,
}

impl fmt::Debug for JsonUserStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonUserStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl JsonUserStore {
    /// Creates a store that persists to the given path.
    ///
    /// This does not read the file; call `load()` for that.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            users: Mutex::new(BTreeMap::new()),
        }
    }

    /// Creates a store at `path` and loads it.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self::new(path);
        store.load().await?;
        Ok(store)
    }

    /// Returns the path to the users file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads users from the JSON file.
    ///
    /// If the file does not exist, the store will be empty.
    pub async fn load(&self) -> Result<()> {
        let mut users = self.users.lock().await;

        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            tracing::debug!("Users file not found at {:?}, starting empty", self.path);
            users.clear();
            return Ok(());
        }

        let contents = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read users file: {}", self.path.display()))?;

        let data: UserStoreData = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse users file: {}", self.path.display()))?;

        users.clear();
        for user in data.users {
            users.insert(user.username.clone(), user);
        }

        tracing::info!("Loaded {} users from {:?}", users.len(), self.path);
        Ok(())
    }

    /// Saves users to the JSON file.
    pub async fn save(&self) -> Result<()> {
        let users = self.users.lock().await;
        self.persist(&users).await
    }

    /// Atomic write: temp file next to the target, then rename.
    async fn persist(&self, users: &BTreeMap<String, UserRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create users directory: {}", parent.display())
            })?;
        }

        let data = UserStoreData {
            version: 1,
            users: users.values().cloned().collect(),
        };
        let contents =
            serde_json::to_string_pretty(&data).context("Failed to serialize users")?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &contents).await.with_context(|| {
            format!("Failed to write temp users file: {}", temp_path.display())
        })?;

        fs::rename(&temp_path, &self.path).await.with_context(|| {
            format!(
                "Failed to rename temp users file {} to {}",
                temp_path.display(),
                self.path.display()
            )
        })?;

        tracing::debug!("Saved {} users to {:?}", users.len(), self.path);
        Ok(())
    }

    /// Adds a new user and saves.
    ///
    /// Fails if a user with that name already exists.
    pub async fn add_user(
        &self,
        username: &str,
        password: &str,
        permissions: PermissionSet,
    ) -> Result<()> {
        if username.is_empty() {
            anyhow::bail!("Username must not be empty");
        }

        let mut users = self.users.lock().await;
        if users.contains_key(username) {
            anyhow::bail!("User {} already exists", username);
        }

        tracing::info!(username, permissions = %permissions, "Adding user");
        let mut next = users.clone();
        next.insert(
            username.to_string(),
            UserRecord::new(username, password, permissions),
        );
        self.persist(&next).await?;
        *users = next;
        Ok(())
    }

    /// Removes a user and saves.
    ///
    /// Returns the removed record if it existed.
    pub async fn remove_user(&self, username: &str) -> Result<Option<UserRecord>> {
        let mut users = self.users.lock().await;
        let mut next = users.clone();
        let removed = next.remove(username);
        if removed.is_some() {
            self.persist(&next).await?;
            *users = next;
            tracing::info!(username, "Removed user");
        }
        Ok(removed)
    }

    /// Replaces a user's permission set and saves.
    pub async fn set_permissions(&self, username: &str, permissions: PermissionSet) -> Result<()> {
        self.update_permissions(username, |current| *current = permissions)
            .await
            .map(|_| ())
    }

    /// Adds tags to a user's permission set and saves.
    pub async fn grant(&self, username: &str, permissions: &[Permission]) -> Result<PermissionSet> {
        self.update_permissions(username, |current| {
            current.extend(permissions.iter().copied())
        })
        .await
    }

    /// Removes tags from a user's permission set and saves.
    pub async fn revoke(&self, username: &str, permissions: &[Permission]) -> Result<PermissionSet> {
        self.update_permissions(username, |current| {
            for permission in permissions {
                current.remove(*permission);
            }
        })
        .await
    }

    async fn update_permissions<F>(&self, username: &str, update: F) -> Result<PermissionSet>
    where
        F: FnOnce(&mut PermissionSet),
    {
        let mut users = self.users.lock().await;
        let mut next = users.clone();
        let user = next
            .get_mut(username)
            .ok_or_else(|| anyhow::anyhow!("User {} not found", username))?;

        let before = user.permissions.clone();
        update(&mut user.permissions);
        let after = user.permissions.clone();

        tracing::info!(username, from = %before, to = %after, "Changing permissions");
        self.persist(&next).await?;
        *users = next;
        Ok(after)
    }

    /// Gets a user by name.
    pub async fn get_user(&self, username: &str) -> Option<UserRecord> {
        self.users.lock().await.get(username).cloned()
    }

    /// Lists all users, sorted by name.
    pub async fn list_users(&self) -> Vec<UserRecord> {
        self.users.lock().await.values().cloned().collect()
    }

    /// Returns the number of users in the store.
    pub async fn len(&self) -> usize {
        self.users.lock().await.len()
    }

    /// Returns true if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Seeds the stock users, skipping any that already exist.
    ///
    /// - `root` holds `ROOT`
    /// - `tester` holds all four file operation tags
    /// - `guest` holds nothing
    ///
    /// Each new user gets a random password. Returns the `(username,
    /// password)` pairs that were created so the caller can show them once.
    pub async fn create_default(&self) -> Result<Vec<(String, String)>> {
        let stock = [
            ("root", PermissionSet::root()),
            (
                "tester",
                Permission::FILE_OPERATIONS.into_iter().collect(),
            ),
            ("guest", PermissionSet::new()),
        ];

        let mut users = self.users.lock().await;
        let mut next = users.clone();
        let mut created = Vec::new();
        for (username, permissions) in stock {
            if next.contains_key(username) {
                continue;
            }
            let password = generate_password();
            next.insert(
                username.to_string(),
                UserRecord::new(username, &password, permissions),
            );
            created.push((username.to_string(), password));
        }

        if !created.is_empty() {
            self.persist(&next).await?;
            *users = next;
            tracing::info!(count = created.len(), "Created default users");
        }
        Ok(created)
    }
}

fn generate_password() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl UserStore for JsonUserStore {
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> std::result::Result<AuthenticatedUser, AuthError> {
        let users = self.users.lock().await;
        match users.get(&credentials.username) {
            Some(user) if user.verify_password(&credentials.password) => Ok(AuthenticatedUser {
                username: user.username.clone(),
                permissions: user.permissions.clone(),
            }),
            Some(_) => Err(AuthError::InvalidCredentials),
            None => {
                // Unknown names cost one hash, like wrong passwords.
                unknown_user().verify_password(&credentials.password);
                Err(AuthError::InvalidCredentials)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(temp_dir: &TempDir) -> JsonUserStore {
        JsonUserStore::new(temp_dir.path().join("users.json"))
    }

    #[test]
    fn test_password_hash_is_salted() {
        let a = UserRecord::new("alice", "secret", PermissionSet::new());
        let b = UserRecord::new("bob", "secret", PermissionSet::new());
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.password_hash, b.password_hash);
        assert_eq!(a.password_hash.len(), 64);
    }

    #[test]
    fn test_verify_password() {
        let user = UserRecord::new("alice", "secret", PermissionSet::new());
        assert!(user.verify_password("secret"));
        assert!(!user.verify_password("Secret"));
        assert!(!user.verify_password(""));
    }

    #[test]
    fn test_verify_password_with_corrupt_salt() {
        let mut user = UserRecord::new("alice", "secret", PermissionSet::new());
        user.salt = "not hex".to_string();
        assert!(!user.verify_password("secret"));
    }

    #[test]
    fn test_unknown_user_record_rejects_everything() {
        let record = unknown_user();
        assert_eq!(hex::decode(&record.salt).unwrap().len(), SALT_LEN);
        assert_eq!(record.password_hash.len(), 64);
        for password in ["", "secret", "0", UNKNOWN_USER_HASH] {
            assert!(!record.verify_password(password));
        }
    }

    #[test]
    fn test_debug_omits_password_hashes() {
        let store = JsonUserStore::new("/tmp/users.json");
        let debug = format!("{:?}", store);
        assert!(debug.contains("users.json"));
        assert!(!debug.contains("password_hash"));
    }

    #[tokio::test]
    async fn test_authenticate() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        let permissions: PermissionSet = [Permission::DownloadFile].into_iter().collect();
        store
            .add_user("alice", "secret", permissions.clone())
            .await
            .unwrap();

        let user = store
            .authenticate(&Credentials::new("alice", "secret"))
            .await
            .unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.permissions, permissions);
    }

    #[tokio::test]
    async fn test_authenticate_failures_look_alike() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        store
            .add_user("alice", "secret", PermissionSet::new())
            .await
            .unwrap();

        let wrong_password = store
            .authenticate(&Credentials::new("alice", "guess"))
            .await
            .unwrap_err();
        let unknown_user = store
            .authenticate(&Credentials::new("mallory", "secret"))
            .await
            .unwrap_err();

        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert!(matches!(unknown_user, AuthError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
    }

    #[tokio::test]
    async fn test_add_duplicate_user_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        store.add_user("alice", "a", PermissionSet::new()).await.unwrap();

        assert!(store.add_user("alice", "b", PermissionSet::new()).await.is_err());
        assert!(store.add_user("", "b", PermissionSet::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_user() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        store.add_user("alice", "a", PermissionSet::new()).await.unwrap();

        let removed = store.remove_user("alice").await.unwrap();
        assert_eq!(removed.unwrap().username, "alice");
        assert!(store.remove_user("alice").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_grant_and_revoke() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        store.add_user("alice", "a", PermissionSet::new()).await.unwrap();

        let granted = store
            .grant("alice", &[Permission::UploadFile, Permission::DeleteFile])
            .await
            .unwrap();
        assert!(granted.allows(Permission::UploadFile));
        assert!(granted.allows(Permission::DeleteFile));

        let revoked = store
            .revoke("alice", &[Permission::UploadFile])
            .await
            .unwrap();
        assert!(!revoked.allows(Permission::UploadFile));
        assert_eq!(
            store.get_user("alice").await.unwrap().permissions,
            revoked
        );

        assert!(store.grant("nobody", &[Permission::Root]).await.is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("users.json");

        {
            let store = JsonUserStore::new(&path);
            store
                .add_user("alice", "secret", PermissionSet::root())
                .await
                .unwrap();
        }

        let store = JsonUserStore::open(&path).await.unwrap();
        assert_eq!(store.len().await, 1);
        let user = store
            .authenticate(&Credentials::new("alice", "secret"))
            .await
            .unwrap();
        assert!(user.permissions.allows(Permission::RenameFile));
    }

    #[tokio::test]
    async fn test_load_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonUserStore::open(temp_dir.path().join("missing.json"))
            .await
            .unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("users.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonUserStore::open(&path).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse users file"));
    }

    #[tokio::test]
    async fn test_failed_save_leaves_new_user_out() {
        let temp_dir = TempDir::new().unwrap();
        // A file where the users directory should be makes every save fail.
        std::fs::write(temp_dir.path().join("blocked"), b"").unwrap();
        let store = JsonUserStore::new(temp_dir.path().join("blocked").join("users.json"));

        assert!(store
            .add_user("alice", "secret", PermissionSet::root())
            .await
            .is_err());
        assert!(store.get_user("alice").await.is_none());
        assert!(store
            .authenticate(&Credentials::new("alice", "secret"))
            .await
            .is_err());

        assert!(store.create_default().await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_existing_state() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("users");
        let store = JsonUserStore::new(dir.join("users.json"));
        store
            .add_user("alice", "secret", PermissionSet::new())
            .await
            .unwrap();

        std::fs::remove_dir_all(&dir).unwrap();
        std::fs::write(&dir, b"").unwrap();

        assert!(store.grant("alice", &[Permission::Root]).await.is_err());
        assert!(store.get_user("alice").await.unwrap().permissions.is_empty());

        assert!(store.remove_user("alice").await.is_err());
        assert!(store.get_user("alice").await.is_some());
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        store.add_user("alice", "a", PermissionSet::new()).await.unwrap();

        assert!(temp_dir.path().join("users.json").exists());
        assert!(!temp_dir.path().join("users.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_format() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);
        store
            .add_user("alice", "a", [Permission::DeleteFile].into_iter().collect())
            .await
            .unwrap();

        let contents = std::fs::read_to_string(store.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["users"][0]["username"], "alice");
        assert_eq!(json["users"][0]["permissions"][0], "DELETE_FILE");
        assert!(!contents.contains("\"a\""));
    }

    #[tokio::test]
    async fn test_create_default() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_in(&temp_dir);

        let created = store.create_default().await.unwrap();
        let names: Vec<&str> = created.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["root", "tester", "guest"]);

        let root = store.get_user("root").await.unwrap();
        assert_eq!(root.permissions, PermissionSet::root());

        let tester = store.get_user("tester").await.unwrap();
        for permission in Permission::FILE_OPERATIONS {
            assert!(tester.permissions.contains(permission));
        }
        assert!(!tester.permissions.contains(Permission::Root));

        assert!(store.get_user("guest").await.unwrap().permissions.is_empty());

        let (_, password) = &created[1];
        assert!(store
            .authenticate(&Credentials::new("tester", password.clone()))
            .await
            .is_ok());

        // Running again keeps existing users and their passwords.
        assert!(store.create_default().await.unwrap().is_empty());
        assert!(store
            .authenticate(&Credentials::new("tester", password.clone()))
            .await
            .is_ok());
    }
}
