//! Anti-forgery token cache.
//!
//! The token is fetched lazily, held only in memory, and shared by every
//! state-changing request. Concurrent callers that find the cache empty
//! share a single fetch.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::api::{ApiError, ApiRequest, Transport};
use crate::utils::lock;

/// Header carrying the token, both in the fetch response and on requests.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Path of the token endpoint under the management API.
pub const CSRF_PATH: &str = "/csrf-token";

type Waiter = oneshot::Sender<Result<String, ApiError>>;

#[derive(Default)]
struct CsrfState {
    token: Option<String>,
    /// `Some` while a fetch is in flight; holds the callers waiting on it.
    waiters: Option<Vec<Waiter>>,
}

pub struct CsrfCache {
    transport: Arc<dyn Transport>,
    endpoint: String,
    state: Mutex<CsrfState>,
}

impl CsrfCache {
    pub fn new(transport: Arc<dyn Transport>, endpoint: impl Into<String>) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            state: Mutex::new(CsrfState::default()),
        }
    }

    pub fn current(&self) -> Option<String> {
        lock(&self.state).token.clone()
    }

    pub fn is_fetching(&self) -> bool {
        lock(&self.state).waiters.is_some()
    }

    /// Drop the cached token; the next `ensure` fetches a new one.
    pub fn invalidate(&self) {
        lock(&self.state).token = None;
    }

    /// Return the cached token or fetch one, joining a fetch already in
    /// flight instead of starting another.
    pub async fn ensure(&self) -> Result<String, ApiError> {
        let waiter = {
            let mut state = lock(&self.state);
            if let Some(token) = &state.token {
                return Ok(token.clone());
            }
            match state.waiters.as_mut() {
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                None => {
                    state.waiters = Some(Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            return rx.await.unwrap_or(Err(ApiError::Aborted));
        }

        let mut flight = Flight {
            cache: self,
            finished: false,
        };
        let result = self.fetch().await;
        flight.finish(&result);
        result
    }

    async fn fetch(&self) -> Result<String, ApiError> {
        debug!(url = %self.endpoint, "Fetching CSRF token");
        let response = self
            .transport
            .send(ApiRequest::get(self.endpoint.as_str()))
            .await?
            .error_for_status()?;

        match response.header(CSRF_HEADER) {
            Some(token) if !token.is_empty() => Ok(token.to_string()),
            _ => {
                warn!("CSRF endpoint answered without a token header");
                Err(ApiError::TokenFetch)
            }
        }
    }
}

/// The leader's hold on an in-flight fetch. Finishing (or dropping) it
/// closes the gate and answers every waiter.
struct Flight<'a> {
    cache: &'a CsrfCache,
    finished: bool,
}

impl Flight<'_> {
    fn finish(&mut self, result: &Result<String, ApiError>) {
        self.finished = true;
        let waiters = {
            let mut state = lock(&self.cache.state);
            if let Ok(token) = result {
                state.token = Some(token.clone());
            }
            state.waiters.take().unwrap_or_default()
        };
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(&Err(ApiError::Aborted));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiResponse;
    use crate::testing::{json, settle, MockTransport, Reply};
    use reqwest::header::{HeaderMap, HeaderValue};
    use reqwest::StatusCode;
    use tokio::sync::Notify;

    fn token_response(token: &str) -> Result<ApiResponse, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CSRF_HEADER, HeaderValue::from_str(token).unwrap());
        Ok(ApiResponse::new(
            StatusCode::OK,
            headers,
            r#"{"success":true,"message":"CSRF token generated"}"#,
        ))
    }

    #[tokio::test]
    async fn test_ensure_caches_token() {
        let transport = MockTransport::new(|_| Reply::Ready(token_response("tok-1")));
        let cache = CsrfCache::new(transport.clone(), "http://api/csrf-token");

        assert_eq!(cache.ensure().await.unwrap(), "tok-1");
        assert_eq!(cache.ensure().await.unwrap(), "tok-1");
        assert_eq!(transport.count("/csrf-token"), 1);
        assert_eq!(cache.current().as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn test_concurrent_ensure_issues_one_fetch() {
        let gate = Arc::new(Notify::new());
        let transport = {
            let gate = gate.clone();
            MockTransport::new(move |_| Reply::Gated(gate.clone(), token_response("shared")))
        };
        let cache = Arc::new(CsrfCache::new(transport.clone(), "http://api/csrf-token"));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.ensure().await })
            })
            .collect();

        settle(|| transport.count("/csrf-token") == 1).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "shared");
        }
        assert_eq!(transport.count("/csrf-token"), 1);
        assert!(!cache.is_fetching());
    }

    #[tokio::test]
    async fn test_missing_header_is_token_fetch_error_and_retries() {
        let transport = MockTransport::new(|_| json(200, serde_json::json!({"success": true})));
        let cache = CsrfCache::new(transport.clone(), "http://api/csrf-token");

        assert!(matches!(cache.ensure().await, Err(ApiError::TokenFetch)));
        assert!(cache.current().is_none());
        assert!(matches!(cache.ensure().await, Err(ApiError::TokenFetch)));
        assert_eq!(transport.count("/csrf-token"), 2);
    }

    #[tokio::test]
    async fn test_waiters_share_the_failure() {
        let gate = Arc::new(Notify::new());
        let transport = {
            let gate = gate.clone();
            MockTransport::new(move |_| {
                Reply::Gated(
                    gate.clone(),
                    Ok(ApiResponse::from_json(200, serde_json::json!({}))),
                )
            })
        };
        let cache = Arc::new(CsrfCache::new(transport.clone(), "http://api/csrf-token"));

        let leader = tokio::spawn({
            let cache = cache.clone();
            async move { cache.ensure().await }
        });
        settle(|| cache.is_fetching()).await;
        let follower = tokio::spawn({
            let cache = cache.clone();
            async move { cache.ensure().await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        assert!(matches!(leader.await.unwrap(), Err(ApiError::TokenFetch)));
        assert!(matches!(follower.await.unwrap(), Err(ApiError::TokenFetch)));
        assert_eq!(transport.count("/csrf-token"), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let transport = MockTransport::new(|_| Reply::Ready(token_response("again")));
        let cache = CsrfCache::new(transport.clone(), "http://api/csrf-token");
        cache.ensure().await.unwrap();
        cache.invalidate();
        assert!(cache.current().is_none());
        cache.ensure().await.unwrap();
        assert_eq!(transport.count("/csrf-token"), 2);
    }
}
