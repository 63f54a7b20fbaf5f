use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::storage::{storage_for, CredentialStorage, ExecutionContext, StorageError};
use crate::utils::lock;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Access tokens live for a day unless the server says otherwise.
pub const DEFAULT_ACCESS_TOKEN_HOURS: i64 = 24;

/// Refresh tokens live for 30 days.
pub const DEFAULT_REFRESH_TOKEN_DAYS: i64 = 30;

pub fn default_access_ttl() -> Duration {
    Duration::hours(DEFAULT_ACCESS_TOKEN_HOURS)
}

pub fn default_refresh_ttl() -> Duration {
    Duration::days(DEFAULT_REFRESH_TOKEN_DAYS)
}

/// The access/refresh credential pair on top of a storage backend.
/// Clone is cheap; clones share the backend.
///
/// An access token the backend refused to write is still served from
/// memory until it expires, a later write succeeds, or the store is
/// cleared. Otherwise every request after a failed write would start
/// another refresh with the stale token.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn CredentialStorage>,
    unsaved_access: Arc<Mutex<Option<(String, DateTime<Utc>)>>>,
}

impl TokenStore {
    pub fn new(context: ExecutionContext, storage: Arc<dyn CredentialStorage>) -> Self {
        Self {
            storage: storage_for(context, storage),
            unsaved_access: Arc::new(Mutex::new(None)),
        }
    }

    /// Read failures are logged and read as absent.
    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to read credential");
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        self.storage.set(key, value, Utc::now() + ttl)?;
        debug!(key = key, ttl_secs = ttl.num_seconds(), "Stored credential");
        Ok(())
    }

    pub fn access_token(&self) -> Option<String> {
        {
            let mut unsaved = lock(&self.unsaved_access);
            match unsaved.as_ref() {
                Some((token, expires_at)) if *expires_at > Utc::now() => {
                    return Some(token.clone())
                }
                Some(_) => *unsaved = None,
                None => {}
            }
        }
        self.read(ACCESS_TOKEN_KEY)
    }

    pub fn set_access_token(&self, token: &str, ttl: Duration) -> Result<(), StorageError> {
        let result = self.write(ACCESS_TOKEN_KEY, token, ttl);
        *lock(&self.unsaved_access) = match &result {
            Ok(()) => None,
            Err(_) => Some((token.to_string(), Utc::now() + ttl)),
        };
        result
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(REFRESH_TOKEN_KEY)
    }

    pub fn set_refresh_token(&self, token: &str, ttl: Duration) -> Result<(), StorageError> {
        self.write(REFRESH_TOKEN_KEY, token, ttl)
    }

    pub fn has_access_token(&self) -> bool {
        self.access_token().is_some()
    }

    /// Remove both credentials in one storage write.
    pub fn clear(&self) -> Result<(), StorageError> {
        *lock(&self.unsaved_access) = None;
        self.storage.remove(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY])?;
        debug!("Cleared stored credentials");
        Ok(())
    }

    pub fn clear_access_token(&self) -> Result<(), StorageError> {
        *lock(&self.unsaved_access) = None;
        self.storage.remove(&[ACCESS_TOKEN_KEY])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemoryStorage;
    use crate::testing::FlakyStorage;

    fn memory_store() -> (Arc<MemoryStorage>, TokenStore) {
        let storage = Arc::new(MemoryStorage::new());
        let tokens = TokenStore::new(ExecutionContext::Client, storage.clone());
        (storage, tokens)
    }

    #[test]
    fn test_access_token_round_trip_then_expiry() {
        let (storage, tokens) = memory_store();
        tokens.set_access_token("t", Duration::hours(1)).unwrap();
        assert_eq!(tokens.access_token().as_deref(), Some("t"));

        storage.advance(Duration::minutes(61));
        assert_eq!(tokens.access_token(), None);
    }

    #[test]
    fn test_refresh_token_outlives_access_token() {
        let (storage, tokens) = memory_store();
        tokens.set_access_token("a", default_access_ttl()).unwrap();
        tokens.set_refresh_token("r", default_refresh_ttl()).unwrap();

        storage.advance(Duration::days(2));
        assert!(!tokens.has_access_token());
        assert_eq!(tokens.refresh_token().as_deref(), Some("r"));

        storage.advance(Duration::days(29));
        assert_eq!(tokens.refresh_token(), None);
    }

    #[test]
    fn test_clear_removes_both() {
        let (storage, tokens) = memory_store();
        tokens.set_access_token("a", Duration::hours(1)).unwrap();
        tokens.set_refresh_token("r", Duration::hours(1)).unwrap();
        tokens.clear().unwrap();
        assert_eq!(tokens.access_token(), None);
        assert_eq!(tokens.refresh_token(), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_clear_access_token_keeps_refresh() {
        let (_storage, tokens) = memory_store();
        tokens.set_access_token("a", Duration::hours(1)).unwrap();
        tokens.set_refresh_token("r", Duration::hours(1)).unwrap();
        tokens.clear_access_token().unwrap();
        assert_eq!(tokens.access_token(), None);
        assert_eq!(tokens.refresh_token().as_deref(), Some("r"));
    }

    #[test]
    fn test_server_context_never_holds_tokens() {
        let storage = Arc::new(MemoryStorage::new());
        let tokens = TokenStore::new(ExecutionContext::Server, storage.clone());
        tokens.set_access_token("a", Duration::hours(1)).unwrap();
        assert_eq!(tokens.access_token(), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_unsaved_access_token_is_served_until_cleared() {
        let storage = Arc::new(FlakyStorage::new());
        let tokens = TokenStore::new(ExecutionContext::Client, storage.clone());
        tokens.set_access_token("old", Duration::hours(1)).unwrap();

        storage.fail_writes(true);
        assert!(tokens.set_access_token("new", Duration::hours(1)).is_err());
        assert_eq!(tokens.access_token().as_deref(), Some("new"));

        // Clones share the in-memory token.
        assert_eq!(tokens.clone().access_token().as_deref(), Some("new"));

        assert!(tokens.clear().is_err());
        assert_eq!(tokens.access_token().as_deref(), Some("old"));

        storage.fail_writes(false);
        tokens.clear().unwrap();
        assert_eq!(tokens.access_token(), None);
    }

    #[test]
    fn test_successful_write_replaces_unsaved_token() {
        let storage = Arc::new(FlakyStorage::new());
        let tokens = TokenStore::new(ExecutionContext::Client, storage.clone());

        storage.fail_writes(true);
        assert!(tokens.set_access_token("memory", Duration::hours(1)).is_err());
        storage.fail_writes(false);
        tokens.set_access_token("stored", Duration::hours(1)).unwrap();
        assert_eq!(tokens.access_token().as_deref(), Some("stored"));
    }

    #[test]
    fn test_unsaved_token_expires() {
        let storage = Arc::new(FlakyStorage::new());
        let tokens = TokenStore::new(ExecutionContext::Client, storage.clone());
        storage.fail_writes(true);
        assert!(tokens.set_access_token("short", Duration::seconds(-1)).is_err());
        assert_eq!(tokens.access_token(), None);
    }
}
