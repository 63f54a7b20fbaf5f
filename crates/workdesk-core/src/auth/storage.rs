//! Durable credential storage backends.
//!
//! Storage is synchronous: reads and writes never suspend the calling task.
//! Every backend enforces expiry itself, so callers only ever see live
//! values.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::utils::lock;

/// Default keychain service name.
pub const DEFAULT_SERVICE: &str = "workdesk";

/// Keychain account holding the credential document.
const KEYRING_ACCOUNT: &str = "session";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt credential document: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Where the client is running.
///
/// Credentials are only reachable from an interactive client; a server or
/// headless context gets a store whose reads are always absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionContext {
    #[default]
    Client,
    Server,
}

/// Small key/value store with per-entry expiry.
pub trait CredentialStorage: Send + Sync {
    /// Live value for `key`, or `None` if missing or expired.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str, expires_at: DateTime<Utc>) -> Result<(), StorageError>;

    /// Remove every key in one write; never leaves some of them behind.
    fn remove(&self, keys: &[&str]) -> Result<(), StorageError>;
}

/// Pick the backend for an execution context.
pub fn storage_for(
    context: ExecutionContext,
    storage: Arc<dyn CredentialStorage>,
) -> Arc<dyn CredentialStorage> {
    match context {
        ExecutionContext::Client => storage,
        ExecutionContext::Server => Arc::new(NoopStorage),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredCredential {
    value: String,
    expires_at: DateTime<Utc>,
}

type CredentialMap = HashMap<String, StoredCredential>;

/// Read `key` from `map`, purging it if expired. Returns the live value and
/// whether the map changed.
fn take_live(map: &mut CredentialMap, key: &str, now: DateTime<Utc>) -> (Option<String>, bool) {
    match map.get(key) {
        Some(stored) if stored.expires_at > now => (Some(stored.value.clone()), false),
        Some(_) => {
            map.remove(key);
            debug!(key = key, "Purged expired credential");
            (None, true)
        }
        None => (None, false),
    }
}

fn insert(map: &mut CredentialMap, key: &str, value: &str, expires_at: DateTime<Utc>) {
    map.insert(
        key.to_string(),
        StoredCredential {
            value: value.to_string(),
            expires_at,
        },
    );
}

// ============================================================================
// Keyring
// ============================================================================

/// OS keychain backend. Both credentials live in one keychain entry so a
/// clear is a single delete.
pub struct KeyringStorage {
    service: String,
    guard: Mutex<()>,
}

impl KeyringStorage {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            guard: Mutex::new(()),
        }
    }

    fn entry(&self) -> Result<Entry, StorageError> {
        Ok(Entry::new(&self.service, KEYRING_ACCOUNT)?)
    }

    fn load(&self) -> Result<CredentialMap, StorageError> {
        match self.entry()?.get_password() {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(keyring::Error::NoEntry) => Ok(CredentialMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, map: &CredentialMap) -> Result<(), StorageError> {
        let entry = self.entry()?;
        if map.is_empty() {
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(e.into()),
            }
        } else {
            entry.set_password(&serde_json::to_string(map)?)?;
            Ok(())
        }
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE)
    }
}

impl CredentialStorage for KeyringStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = lock(&self.guard);
        let mut map = self.load()?;
        let (value, changed) = take_live(&mut map, key, Utc::now());
        if changed {
            self.save(&map)?;
        }
        Ok(value)
    }

    fn set(&self, key: &str, value: &str, expires_at: DateTime<Utc>) -> Result<(), StorageError> {
        let _guard = lock(&self.guard);
        let mut map = self.load()?;
        insert(&mut map, key, value, expires_at);
        self.save(&map)
    }

    fn remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        let _guard = lock(&self.guard);
        let mut map = self.load()?;
        for key in keys {
            map.remove(*key);
        }
        self.save(&map)
    }
}

// ============================================================================
// File
// ============================================================================

/// JSON document on disk. Writes go to a sibling temp file and are renamed
/// into place, so a reader sees either the old or the new document.
pub struct FileStorage {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<CredentialMap, StorageError> {
        if !self.path.exists() {
            return Ok(CredentialMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(CredentialMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, map: &CredentialMap) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(map)?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CredentialStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = lock(&self.guard);
        let mut map = self.load()?;
        let (value, changed) = take_live(&mut map, key, Utc::now());
        if changed {
            self.save(&map)?;
        }
        Ok(value)
    }

    fn set(&self, key: &str, value: &str, expires_at: DateTime<Utc>) -> Result<(), StorageError> {
        let _guard = lock(&self.guard);
        let mut map = self.load()?;
        insert(&mut map, key, value, expires_at);
        self.save(&map)
    }

    fn remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        let _guard = lock(&self.guard);
        let mut map = self.load()?;
        let before = map.len();
        for key in keys {
            map.remove(*key);
        }
        if map.len() == before && !self.path.exists() {
            return Ok(());
        }
        self.save(&map)
    }
}

// ============================================================================
// Memory / no-op
// ============================================================================

#[derive(Default)]
struct MemoryState {
    entries: CredentialMap,
    clock_offset: Duration,
}

/// Process-local storage with a movable clock, for tests and embedding.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move this store's notion of "now" forward.
    pub fn advance(&self, by: Duration) {
        lock(&self.state).clock_offset += by;
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut state = lock(&self.state);
        let now = Utc::now() + state.clock_offset;
        Ok(take_live(&mut state.entries, key, now).0)
    }

    fn set(&self, key: &str, value: &str, expires_at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        // Expiry is stored relative to this store's clock.
        let expires_at = expires_at + state.clock_offset;
        insert(&mut state.entries, key, value, expires_at);
        Ok(())
    }

    fn remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        for key in keys {
            state.entries.remove(*key);
        }
        Ok(())
    }
}

/// Storage for contexts without client-side persistence.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStorage;

impl CredentialStorage for NoopStorage {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str, _expires_at: DateTime<Utc>) -> Result<(), StorageError> {
        Ok(())
    }

    fn remove(&self, _keys: &[&str]) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_expires_entries() {
        let storage = MemoryStorage::new();
        storage
            .set("k", "v", Utc::now() + Duration::minutes(5))
            .unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));

        storage.advance(Duration::minutes(6));
        assert_eq!(storage.get("k").unwrap(), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_server_context_uses_noop_storage() {
        let memory: Arc<dyn CredentialStorage> = Arc::new(MemoryStorage::new());
        let storage = storage_for(ExecutionContext::Server, memory);
        storage
            .set("k", "v", Utc::now() + Duration::hours(1))
            .unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
    }

    #[test]
    fn test_file_storage_round_trip_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.json");
        let storage = FileStorage::new(&path);
        let expires = Utc::now() + Duration::hours(1);

        storage.set("access_token", "a", expires).unwrap();
        storage.set("refresh_token", "r", expires).unwrap();

        // A second handle on the same file sees the same values.
        let reopened = FileStorage::new(&path);
        assert_eq!(reopened.get("access_token").unwrap().as_deref(), Some("a"));
        assert_eq!(reopened.get("refresh_token").unwrap().as_deref(), Some("r"));

        reopened.remove(&["access_token", "refresh_token"]).unwrap();
        assert_eq!(storage.get("access_token").unwrap(), None);
        assert_eq!(storage.get("refresh_token").unwrap(), None);
    }

    #[test]
    fn test_file_storage_purges_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("credentials.json"));
        storage
            .set("access_token", "old", Utc::now() - Duration::seconds(1))
            .unwrap();
        assert_eq!(storage.get("access_token").unwrap(), None);

        let contents = std::fs::read_to_string(storage.path()).unwrap();
        assert!(!contents.contains("old"));
    }

    #[test]
    fn test_file_storage_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("absent.json"));
        assert_eq!(storage.get("access_token").unwrap(), None);
        storage.remove(&["access_token"]).unwrap();
        assert!(!storage.path().exists());
    }
}
