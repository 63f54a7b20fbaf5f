use std::sync::Arc;

use thiserror::Error;

use crate::auth::StorageError;

/// Every failure the request pipeline, auth client and resource clients can
/// surface.
///
/// The enum is `Clone` so a single refresh failure can be handed to every
/// request queued behind it; the transport error is shared through an `Arc`
/// for that reason.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// Login, registration or refresh rejected by the auth backend.
    #[error("{0}")]
    Auth(String),

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("CSRF token not found in response header")]
    TokenFetch,

    #[error("Network error: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    /// A success response whose envelope lacks the expected payload.
    #[error("Invalid response format: {0}")]
    ResponseShape(String),

    /// A 401 on a request that was already replayed once.
    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The refresh cycle this request was waiting on went away.
    #[error("Request aborted before the token refresh completed")]
    Aborted,

    #[error("Credential storage error: {0}")]
    Storage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..end],
                body.len()
            )
        }
    }

    /// Classify a non-success status. `message` is the server-provided
    /// envelope message when one could be extracted; otherwise the raw body
    /// is used.
    pub fn from_status(status: reqwest::StatusCode, message: Option<&str>, body: &str) -> Self {
        let detail = match message {
            Some(message) => message.to_string(),
            None => Self::truncate_body(body),
        };
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(detail),
            404 => ApiError::NotFound(detail),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(detail),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, detail)),
        }
    }

    /// Whether this error came from the transport rather than the server.
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Network(Arc::new(err))
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err.to_string())
    }
}
