//! Observable sign-in state for front ends.
//!
//! `AuthState` wraps an [`AuthClient`] and publishes the current user, a
//! loading flag and the last error message on a `watch` channel. Every
//! operation flips `loading` for its duration, records a readable message
//! on failure and still hands the error back to the caller.

use tokio::sync::watch;
use tracing::debug;

use super::client::AuthClient;
use crate::api::ApiError;
use crate::models::{ChangePasswordRequest, LoginRequest, RegisterRequest, User};

pub const VERIFY_FAILED: &str = "Failed to verify authentication";
const LOGIN_FAILED: &str = "Login failed";
const REGISTER_FAILED: &str = "Registration failed";
const LOGOUT_FAILED: &str = "Logout failed";
const REFRESH_USER_FAILED: &str = "Failed to refresh user";
const CHANGE_PASSWORD_FAILED: &str = "Failed to change password";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthSnapshot {
    pub user: Option<User>,
    pub loading: bool,
    pub error: Option<String>,
}

impl AuthSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Message shown for a failed operation: the server's own wording when it
/// sent one, otherwise `fallback`.
fn message_for(err: &ApiError, fallback: &str) -> String {
    match err {
        ApiError::Auth(message)
        | ApiError::AccessDenied(message)
        | ApiError::NotFound(message)
        | ApiError::ServerError(message) => message.clone(),
        _ => fallback.to_string(),
    }
}

pub struct AuthState {
    client: AuthClient,
    state: watch::Sender<AuthSnapshot>,
}

impl AuthState {
    pub fn new(client: AuthClient) -> Self {
        let (state, _) = watch::channel(AuthSnapshot::default());
        Self { client, state }
    }

    pub fn client(&self) -> &AuthClient {
        &self.client
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.state.borrow().clone()
    }

    /// Whether stored credentials exist, regardless of whether a user has
    /// been loaded yet.
    pub fn has_tokens(&self) -> bool {
        self.client.is_authenticated()
    }

    fn begin(&self) {
        self.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });
    }

    fn finish(&self, update: impl FnOnce(&mut AuthSnapshot)) {
        self.state.send_modify(|s| {
            update(s);
            s.loading = false;
        });
    }

    /// Load the user behind the stored credentials, if any.
    ///
    /// A failure to verify them clears the session.
    pub async fn initialize(&self) -> Result<Option<User>, ApiError> {
        if !self.client.is_authenticated() {
            self.state.send_modify(|s| s.user = None);
            return Ok(None);
        }

        self.begin();
        match self.client.current_user().await {
            Ok(user) => {
                self.finish(|s| s.user = Some(user.clone()));
                Ok(Some(user))
            }
            Err(e) => {
                debug!(error = %e, "Stored credentials did not verify");
                self.client.session().clear();
                self.finish(|s| {
                    s.user = None;
                    s.error = Some(VERIFY_FAILED.to_string());
                });
                Err(e)
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<(), ApiError> {
        self.begin();
        let credentials = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        match self.client.login(&credentials).await {
            Ok(grant) => {
                self.finish(|s| s.user = grant.user);
                Ok(())
            }
            Err(e) => {
                self.finish(|s| s.error = Some(message_for(&e, LOGIN_FAILED)));
                Err(e)
            }
        }
    }

    pub async fn register(&self, details: &RegisterRequest) -> Result<(), ApiError> {
        self.begin();
        match self.client.register(details).await {
            Ok(grant) => {
                self.finish(|s| s.user = grant.user);
                Ok(())
            }
            Err(e) => {
                self.finish(|s| s.error = Some(message_for(&e, REGISTER_FAILED)));
                Err(e)
            }
        }
    }

    /// Credentials are gone afterwards even if the server call failed, so
    /// the user is always dropped.
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.begin();
        let result = self.client.logout().await;
        self.finish(|s| {
            s.user = None;
            if let Err(e) = &result {
                s.error = Some(message_for(e, LOGOUT_FAILED));
            }
        });
        result
    }

    pub async fn refresh_user(&self) -> Result<User, ApiError> {
        self.begin();
        match self.client.current_user().await {
            Ok(user) => {
                self.finish(|s| s.user = Some(user.clone()));
                Ok(user)
            }
            Err(e) => {
                self.finish(|s| s.error = Some(message_for(&e, REFRESH_USER_FAILED)));
                Err(e)
            }
        }
    }

    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<(), ApiError> {
        self.begin();
        let change = ChangePasswordRequest {
            old_password: old_password.to_string(),
            new_password: new_password.to_string(),
        };
        let result = self.client.change_password(&change).await;
        self.finish(|s| {
            if let Err(e) = &result {
                s.error = Some(message_for(e, CHANGE_PASSWORD_FAILED));
            }
        });
        result
    }

    /// Forget the user and local credentials without calling the server.
    pub fn clear(&self) {
        self.client.session().clear();
        self.state.send_modify(|s| {
            s.user = None;
            s.error = None;
        });
    }
}
