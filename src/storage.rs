//! Persisted token entries
//!
//! The durable side of the token store is an external key-value collaborator that
//! behaves like a cookie jar: every entry carries its own expiry plus path,
//! same-site and secure attributes, and an expired entry reads as absent.

use crate::config::{CookieConfig, SameSite};
use chrono::{DateTime, Utc};
use papaya::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage I/O failed: {0}")]
    Io(String),

    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),
}

/// A single persisted entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub value: String,
    pub expires_at: DateTime<Utc>,
    pub path: String,
    pub same_site: SameSite,
    pub secure: bool,
}

impl StoredEntry {
    pub fn new(value: String, expires_at: DateTime<Utc>, cookie: &CookieConfig) -> Self {
        Self {
            value,
            expires_at,
            path: cookie.path.clone(),
            same_site: cookie.same_site,
            secure: cookie.secure,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Durable key-value storage for token entries
pub trait TokenStorage: Send + Sync {
    /// Write or replace an entry
    fn put(&self, key: &str, entry: StoredEntry) -> Result<(), StorageError>;

    /// Read an entry; expired entries are reported as `None`
    fn get(&self, key: &str) -> Result<Option<StoredEntry>, StorageError>;

    /// Remove an entry; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process storage backed by a concurrent map
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<HashMap<String, StoredEntry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, expired ones included
    pub fn len(&self) -> usize {
        self.entries.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw entry lookup that ignores expiry
    pub fn raw(&self, key: &str) -> Option<StoredEntry> {
        self.entries.pin().get(key).cloned()
    }
}

impl TokenStorage for MemoryStorage {
    fn put(&self, key: &str, entry: StoredEntry) -> Result<(), StorageError> {
        self.entries.pin().insert(key.to_string(), entry);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
        let now = Utc::now();
        Ok(self
            .entries
            .pin()
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .cloned())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.pin().remove(key);
        Ok(())
    }
}

/// Storage persisted as a single JSON document on disk
///
/// Every write rewrites the whole file through a temporary sibling and a rename.
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, StoredEntry>, StorageError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StorageError::Io(e.to_string())),
        }
    }

    fn save(&self, entries: &BTreeMap<String, StoredEntry>) -> Result<(), StorageError> {
        let bytes =
            serde_json::to_vec_pretty(entries).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes).map_err(|e| StorageError::Io(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StorageError::Io(e.to_string()))
    }

    fn modify(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, StoredEntry>),
    ) -> Result<(), StorageError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StorageError::Unavailable("storage lock poisoned".to_string()))?;
        let mut entries = match self.load() {
            Ok(entries) => entries,
            Err(StorageError::Corrupt(reason)) => {
                warn!(path = %self.path.display(), error = %reason, "Overwriting corrupt session file");
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        f(&mut entries);
        self.save(&entries)
    }
}

impl TokenStorage for FileStorage {
    fn put(&self, key: &str, entry: StoredEntry) -> Result<(), StorageError> {
        self.modify(|entries| {
            entries.insert(key.to_string(), entry);
        })
    }

    fn get(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StorageError::Unavailable("storage lock poisoned".to_string()))?;
        let now = Utc::now();
        Ok(self
            .load()?
            .remove(key)
            .filter(|entry| !entry.is_expired_at(now)))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.modify(|entries| {
            entries.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn entry(value: &str, ttl: Duration) -> StoredEntry {
        StoredEntry::new(value.to_string(), Utc::now() + ttl, &CookieConfig::default())
    }

    #[test]
    fn test_memory_storage_hides_expired_entries() {
        let storage = MemoryStorage::new();

        storage.put(ACCESS_TOKEN_KEY, entry("a1", Duration::seconds(-1))).unwrap();
        storage.put(REFRESH_TOKEN_KEY, entry("r1", Duration::days(7))).unwrap();

        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap().unwrap().value, "r1");
        assert!(storage.raw(ACCESS_TOKEN_KEY).is_some());

        storage.remove(ACCESS_TOKEN_KEY).unwrap();
        storage.remove(ACCESS_TOKEN_KEY).unwrap();
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let storage = FileStorage::new(&path);
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap(), None);
        storage.put(ACCESS_TOKEN_KEY, entry("a1", Duration::minutes(30))).unwrap();
        storage.put(REFRESH_TOKEN_KEY, entry("r1", Duration::days(7))).unwrap();

        let reopened = FileStorage::new(&path);
        let access = reopened.get(ACCESS_TOKEN_KEY).unwrap().unwrap();
        assert_eq!(access.value, "a1");
        assert_eq!(access.path, "/");
        assert_eq!(access.same_site, SameSite::Strict);
        assert!(access.secure);

        reopened.remove(ACCESS_TOKEN_KEY).unwrap();
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap().unwrap().value, "r1");
    }

    #[test]
    fn test_file_storage_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"not json").unwrap();

        let storage = FileStorage::new(&path);
        assert!(matches!(
            storage.get(ACCESS_TOKEN_KEY),
            Err(StorageError::Corrupt(_))
        ));
    }

    #[test]
    fn test_file_storage_write_replaces_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{garbage").unwrap();

        let storage = FileStorage::new(&path);
        storage.put(ACCESS_TOKEN_KEY, entry("a1", Duration::minutes(30))).unwrap();

        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap().unwrap().value, "a1");
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_does_not_pin_token_store_to_memory() {
        use crate::config::ClientConfig;
        use crate::token_store::TokenStore;
        use crate::types::TokenPair;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{garbage").unwrap();

        let store = TokenStore::new(Arc::new(FileStorage::new(&path)), &ClientConfig::default());
        let persistence = store.set_tokens(TokenPair {
            access_token: "a1".to_string(),
            refresh_token: "r1".to_string(),
            expires_in_secs: 1800,
        });

        assert!(persistence.is_durable());
        assert!(store.clear_tokens().is_durable());
        assert_eq!(FileStorage::new(&path).get(REFRESH_TOKEN_KEY).unwrap(), None);
    }
}
