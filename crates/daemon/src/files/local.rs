//! A [`FileStore`] backed by one directory on the local filesystem.
//!
//! Writes go to a temp file in the destination directory and are renamed into
//! place. Operations on the same path are serialized with one async mutex per
//! path; operations on different paths run concurrently.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::store::{FileStore, FileStoreError};

type LockMap = DashMap<PathBuf, Arc<Mutex<()>>>;

/// Files served from a root directory.
pub struct LocalFileStore {
    root: PathBuf,
    locks: LockMap,
}

/// Held for the duration of one operation on one path.
///
/// Dropping it releases the mutex and forgets the map entry once no other
/// task is waiting on it.
struct PathLock<'a> {
    locks: &'a LockMap,
    key: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PathLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl LocalFileStore {
    /// Create a store rooted at `root`. The directory is not touched.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            locks: DashMap::new(),
        }
    }

    /// Create a store rooted at `root`, creating the directory if needed.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self, FileStoreError> {
        let store = Self::new(root);
        fs::create_dir_all(&store.root).await.map_err(|e| FileStoreError::Io {
            path: store.root.display().to_string(),
            source: e,
        })?;
        Ok(store)
    }

    /// The storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of paths with an operation in flight.
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    /// Lexically resolve a client path to a relative path under the root.
    ///
    /// Rejects empty paths, absolute paths and `..` components. `.`
    /// components are dropped.
    pub fn normalize(path: &str) -> Result<PathBuf, FileStoreError> {
        let mut normalized = PathBuf::new();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(FileStoreError::invalid_path(path, "contains '..'"))
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(FileStoreError::invalid_path(path, "must be relative"))
                }
            }
        }

        if normalized.as_os_str().is_empty() {
            return Err(FileStoreError::invalid_path(path, "names no file"));
        }
        Ok(normalized)
    }

    /// Resolve a client path to its location on disk and make sure symlinks
    /// along the way do not lead outside the root.
    async fn resolve(&self, path: &str) -> Result<(PathBuf, PathBuf), FileStoreError> {
        let relative = Self::normalize(path)?;
        let full = self.root.join(&relative);

        let root = fs::canonicalize(&self.root)
            .await
            .map_err(|e| FileStoreError::Io {
                path: self.root.display().to_string(),
                source: e,
            })?;

        // The deepest existing ancestor decides where the path really lands.
        let mut ancestor = full.clone();
        loop {
            match fs::canonicalize(&ancestor).await {
                Ok(real) => {
                    if !real.starts_with(&root) {
                        return Err(FileStoreError::invalid_path(
                            path,
                            "escapes the storage root",
                        ));
                    }
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if !ancestor.pop() || !ancestor.starts_with(&self.root) {
                        break;
                    }
                }
                Err(e) => return Err(FileStoreError::from_io(path, e)),
            }
        }

        Ok((relative, full))
    }

    async fn lock(&self, key: &Path) -> PathLock<'_> {
        let mutex = self
            .locks
            .entry(key.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        PathLock {
            locks: &self.locks,
            key: key.to_path_buf(),
            guard: Some(guard),
        }
    }

    async fn ensure_file(full: &Path, path: &str) -> Result<(), FileStoreError> {
        let metadata = fs::metadata(full)
            .await
            .map_err(|e| FileStoreError::from_io(path, e))?;
        if metadata.is_dir() {
            return Err(FileStoreError::IsADirectory(path.to_string()));
        }
        Ok(())
    }

    async fn ensure_not_dir(full: &Path, path: &str) -> Result<(), FileStoreError> {
        match fs::metadata(full).await {
            Ok(metadata) if metadata.is_dir() => {
                Err(FileStoreError::IsADirectory(path.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn create_parent(full: &Path, path: &str) -> Result<(), FileStoreError> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FileStoreError::from_io(path, e))?;
        }
        Ok(())
    }
}

impl FileStore for LocalFileStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>, FileStoreError> {
        let (key, full) = self.resolve(path).await?;
        let _lock = self.lock(&key).await;

        Self::ensure_file(&full, path).await?;
        let data = fs::read(&full)
            .await
            .map_err(|e| FileStoreError::from_io(path, e))?;

        debug!(path, size = data.len(), "Read file");
        Ok(data)
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), FileStoreError> {
        let (key, full) = self.resolve(path).await?;
        let _lock = self.lock(&key).await;

        Self::ensure_not_dir(&full, path).await?;
        Self::create_parent(&full, path).await?;

        let file_name = full
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = full.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        if let Err(e) = fs::write(&temp_path, data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(FileStoreError::from_io(path, e));
        }
        if let Err(e) = fs::rename(&temp_path, &full).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(FileStoreError::from_io(path, e));
        }

        debug!(path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), FileStoreError> {
        let (key, full) = self.resolve(path).await?;
        let _lock = self.lock(&key).await;

        Self::ensure_file(&full, path).await?;
        fs::remove_file(&full)
            .await
            .map_err(|e| FileStoreError::from_io(path, e))?;

        debug!(path, "Deleted file");
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), FileStoreError> {
        let (from_key, from_full) = self.resolve(from).await?;
        let (to_key, to_full) = self.resolve(to).await?;

        // Always lock in the same order so two opposite renames cannot deadlock.
        let (first, second) = if from_key <= to_key {
            (&from_key, &to_key)
        } else {
            (&to_key, &from_key)
        };
        let _first = self.lock(first).await;
        let _second = if first != second {
            Some(self.lock(second).await)
        } else {
            None
        };

        Self::ensure_file(&from_full, from).await?;
        if from_key == to_key {
            return Ok(());
        }
        Self::ensure_not_dir(&to_full, to).await?;
        Self::create_parent(&to_full, to).await?;

        fs::rename(&from_full, &to_full)
            .await
            .map_err(|e| FileStoreError::from_io(from, e))?;

        debug!(from, to, "Renamed file");
        Ok(())
    }
}
