// ABOUTME: Object storage capability and its directory-tree backend (e.g. a mounted bucket).
// ABOUTME: Keys are absolute, traversal-guarded paths; writes land atomically via temp file and rename.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid object key {0:?}")]
    InvalidKey(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where artifacts live once they are durably stored.
pub trait ObjectStorage {
    /// Upload the file at `source` under `key`, returning the bytes written.
    fn put(&self, key: &str, source: &Path) -> Result<u64, StorageError>;

    /// Download `key` into `dest`, returning the bytes written.
    fn get(&self, key: &str, dest: &Path) -> Result<u64, StorageError>;

    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// A URL granting temporary read access to `key`.
    fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// Reject keys that are relative, empty or escape the storage root.
pub fn validate_key(key: &str) -> Result<&str, StorageError> {
    let relative = key
        .strip_prefix('/')
        .ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
    if relative.is_empty() {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    let safe = Path::new(relative)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(relative)
}

/// Object storage rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    root: PathBuf,
    secret: Option<String>,
}

impl FilesystemStorage {
    pub fn new(root: impl Into<PathBuf>, secret: Option<String>) -> Self {
        Self {
            root: root.into(),
            secret,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(validate_key(key)?))
    }

    fn signature(&self, key: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"\n");
        hasher.update(key.as_bytes());
        hasher.update(b"\n");
        hasher.update(expires.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl ObjectStorage for FilesystemStorage {
    fn put(&self, key: &str, source: &Path) -> Result<u64, StorageError> {
        let target = self.resolve(key)?;
        if !source.is_file() {
            return Err(StorageError::NotFound(source.display().to_string()));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let partial = target.with_file_name(format!(
            ".{}.{}.partial",
            target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Ulid::new()
        ));
        let written = match fs::copy(source, &partial) {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&partial);
                return Err(e.into());
            }
        };
        fs::File::open(&partial)?.sync_all()?;
        fs::rename(&partial, &target)?;

        debug!(key, bytes = written, "stored object");
        Ok(written)
    }

    fn get(&self, key: &str, dest: &Path) -> Result<u64, StorageError> {
        let source = self.resolve(key)?;
        if !source.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let read = fs::copy(&source, dest)?;
        debug!(key, bytes = read, dest = %dest.display(), "fetched object");
        Ok(read)
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.resolve(key)?.is_file())
    }

    fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let path = self.resolve(key)?;
        if !path.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
            .timestamp();
        Ok(format!(
            "file://{}?expires={expires}&signature={}",
            path.display(),
            self.signature(key, expires)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> FilesystemStorage {
        FilesystemStorage::new(dir.path().join("bucket"), Some("s3cret".to_string()))
    }

    #[test]
    fn keys_must_be_absolute_and_contained() {
        assert_eq!(validate_key("/dumps/1.dump").unwrap(), "dumps/1.dump");
        assert!(validate_key("dumps/1.dump").is_err());
        assert!(validate_key("/").is_err());
        assert!(validate_key("/dumps/../../etc/passwd").is_err());
        assert!(validate_key("/dumps/./x").is_err());
    }

    #[test]
    fn put_then_get_copies_bytes() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let source = dir.path().join("source.bin");
        fs::write(&source, b"hello").unwrap();

        assert_eq!(storage.put("/backups/a.tar.gz", &source).unwrap(), 5);
        assert!(storage.exists("/backups/a.tar.gz").unwrap());

        let dest = dir.path().join("out/a.tar.gz");
        assert_eq!(storage.get("/backups/a.tar.gz", &dest).unwrap(), 5);
        assert_eq!(fs::read(&dest).unwrap(), b"hello");

        // No partial files are left next to the object.
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("bucket/backups"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn missing_objects_are_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        assert!(!storage.exists("/nope").unwrap());
        assert!(matches!(
            storage.get("/nope", &dir.path().join("x")),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.presign("/nope", Duration::from_secs(60)),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.put("/x", &dir.path().join("missing")),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn presigned_url_is_signed() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let source = dir.path().join("d.dump");
        fs::write(&source, b"dump").unwrap();
        storage.put("/dumps/d.dump", &source).unwrap();

        let url = storage
            .presign("/dumps/d.dump", Duration::from_secs(3600))
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.contains("dumps/d.dump?expires="));

        let signature = url.rsplit("signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
    }
}
