//! Outgoing request stages.
//!
//! A pipeline runs its stages in order before every transport call. A
//! stage gets the request by value and returns the request to send next;
//! the returned future lets a stage suspend (e.g. while a CSRF token is
//! fetched) or fail the request outright.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use reqwest::header::{self, HeaderName};

use super::request::ApiRequest;
use super::ApiError;
use crate::auth::{CsrfCache, TokenStore, CSRF_HEADER};

pub trait RequestStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiRequest, ApiError>>;
}

/// Attaches the stored access token as a bearer header.
///
/// A request that already carries an Authorization header (a replay after
/// a refresh) keeps it.
pub struct BearerAuth {
    tokens: TokenStore,
}

impl BearerAuth {
    pub fn new(tokens: TokenStore) -> Self {
        Self { tokens }
    }
}

impl RequestStage for BearerAuth {
    fn name(&self) -> &'static str {
        "bearer-auth"
    }

    fn apply(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiRequest, ApiError>> {
        let result = if request.headers().contains_key(header::AUTHORIZATION) {
            Ok(request)
        } else {
            match self.tokens.access_token() {
                Some(token) => request.bearer(&token),
                None => Ok(request),
            }
        };
        futures::future::ready(result).boxed()
    }
}

/// Adds the anti-forgery header to create/update/delete requests.
pub struct CsrfProtection {
    cache: Arc<CsrfCache>,
}

impl CsrfProtection {
    pub fn new(cache: Arc<CsrfCache>) -> Self {
        Self { cache }
    }
}

impl RequestStage for CsrfProtection {
    fn name(&self) -> &'static str {
        "csrf"
    }

    fn apply(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiRequest, ApiError>> {
        async move {
            if !request.is_state_changing() {
                return Ok(request);
            }
            let token = self.cache.ensure().await?;
            request.header(HeaderName::from_static(CSRF_HEADER), &token)
        }
        .boxed()
    }
}
