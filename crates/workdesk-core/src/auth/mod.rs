//! Credentials, CSRF protection and the auth API client.

pub(crate) mod client;
mod csrf;
mod session;
mod state;
mod storage;
mod tokens;

pub use client::{AuthClient, AUTH_PATH};
pub use csrf::{CsrfCache, CSRF_HEADER, CSRF_PATH};
pub use session::Session;
pub use state::{AuthSnapshot, AuthState, VERIFY_FAILED};
pub use storage::{
    storage_for, CredentialStorage, ExecutionContext, FileStorage, KeyringStorage, MemoryStorage,
    NoopStorage, StorageError, DEFAULT_SERVICE,
};
pub use tokens::{
    default_access_ttl, default_refresh_ttl, TokenStore, ACCESS_TOKEN_KEY,
    DEFAULT_ACCESS_TOKEN_HOURS, DEFAULT_REFRESH_TOKEN_DAYS, REFRESH_TOKEN_KEY,
};
