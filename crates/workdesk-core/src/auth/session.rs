use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, warn};

use super::csrf::CsrfCache;
use super::storage::StorageError;
use super::tokens::{default_access_ttl, default_refresh_ttl, TokenStore};
use crate::api::RefreshCoordinator;
use crate::models::AuthResponse;

/// Per-client authentication state shared by every pipeline of one client:
/// the stored credentials, the CSRF token and the refresh gate.
///
/// Independent `Session`s never see each other's refresh cycles.
pub struct Session {
    tokens: TokenStore,
    csrf: Arc<CsrfCache>,
    refresh: RefreshCoordinator,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl Session {
    pub fn new(tokens: TokenStore, csrf: Arc<CsrfCache>) -> Self {
        Self {
            tokens,
            csrf,
            refresh: RefreshCoordinator::new(),
            access_ttl: default_access_ttl(),
            refresh_ttl: default_refresh_ttl(),
        }
    }

    /// Lifetimes used when the server does not state one.
    pub fn with_ttls(mut self, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        self.access_ttl = access_ttl;
        self.refresh_ttl = refresh_ttl;
        self
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn csrf(&self) -> &Arc<CsrfCache> {
        &self.csrf
    }

    pub fn refresh(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.has_access_token()
    }

    /// Persist freshly issued tokens. The access lifetime comes from
    /// `expiresIn` when present; a refresh token is only written if the
    /// server sent one.
    pub fn store_grant(&self, grant: &AuthResponse) -> Result<(), StorageError> {
        let access_ttl = grant
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(Duration::seconds)
            .unwrap_or(self.access_ttl);
        self.tokens.set_access_token(&grant.access_token, access_ttl)?;
        if let Some(refresh_token) = &grant.refresh_token {
            self.tokens.set_refresh_token(refresh_token, self.refresh_ttl)?;
        }
        debug!(
            access_ttl_secs = access_ttl.num_seconds(),
            rotated_refresh = grant.refresh_token.is_some(),
            "Stored token grant"
        );
        Ok(())
    }

    /// Drop both credentials and the CSRF token. Always completes; a storage
    /// failure is logged.
    pub fn clear(&self) {
        if let Err(e) = self.tokens.clear() {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        self.csrf.invalidate();
    }
}
