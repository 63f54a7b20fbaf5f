//! The network boundary of the pipeline.
//!
//! Everything above this trait works on `ApiRequest`/`ApiResponse` values,
//! so tests swap in a scripted transport while production uses reqwest.

use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use reqwest::{header, Client, StatusCode};
use tracing::{debug, warn};

use super::request::{ApiRequest, ApiResponse};
use super::ApiError;

/// Maximum number of retries for rate-limited (429) requests.
pub const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Sends a fully prepared request and returns the whole response.
///
/// Non-success statuses are ordinary responses, not errors; only failures
/// to talk to the server at all are `Err`.
pub trait Transport: Send + Sync {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, ApiError>>;
}

/// Exponential backoff for 429 responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RATE_LIMIT_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    retry: RetryPolicy,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        // The cookie store keeps the CSRF cookie that pairs with the header.
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .default_headers(headers)
            .build()?;

        Ok(Self { client, retry })
    }

    /// Share an existing connection pool.
    pub fn with_client(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    fn build(&self, request: &ApiRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(request.method().clone(), request.url())
            .headers(request.headers().clone());
        if !request.query_pairs().is_empty() {
            builder = builder.query(request.query_pairs());
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }
        builder
    }

    async fn send_with_retry(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut retries = 0;
        let mut backoff = self.retry.initial_backoff;

        loop {
            let response = self.build(&request).send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > self.retry.max_retries {
                    return Err(ApiError::RateLimited);
                }
                warn!(
                    url = request.url(),
                    retry = retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2; // Exponential backoff
                continue;
            }

            let headers = response.headers().clone();
            let body = response.text().await?;
            debug!(
                method = %request.method(),
                url = request.url(),
                status = status.as_u16(),
                "Response received"
            );
            return Ok(ApiResponse::new(status, headers, body));
        }
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, ApiError>> {
        self.send_with_retry(request).boxed()
    }
}
