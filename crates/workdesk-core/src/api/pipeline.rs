//! The authenticated request pipeline.
//!
//! Every request runs the outgoing stages (bearer token, CSRF token) and is
//! handed to the transport. A 401 on a first attempt starts, or joins, the
//! session's single refresh cycle:
//!
//! ```text
//! PENDING -> SENT -> SUCCEEDED | FAILED_OTHER
//!                 -> FAILED_AUTH -> AWAITING_REFRESH -> RETRIED_SUCCEEDED
//!                                                    -> RETRIED_FAILED
//!                                                    -> ABORTED
//! ```
//!
//! A request is replayed at most once. A 401 on the replay is terminal.

use std::sync::Arc;

use futures::future::join_all;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::middleware::{BearerAuth, CsrfProtection, RequestStage};
use super::refresh::{Admission, RefreshCycle};
use super::request::{ApiRequest, ApiResponse};
use super::transport::Transport;
use super::ApiError;
use crate::auth::client::{read_auth_response, refresh_request, REFRESH_FAILED};
use crate::auth::Session;
use crate::models::AuthResponse;

/// One API base URL bound to a transport and a session.
///
/// Clone is cheap; clones share the transport, the session and the stages.
/// Pipelines built over the same `Session` share one refresh cycle.
#[derive(Clone)]
pub struct Pipeline {
    base_url: String,
    refresh_endpoint: String,
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
    stages: Vec<Arc<dyn RequestStage>>,
}

impl Pipeline {
    /// A pipeline with the default stages: bearer auth, then CSRF.
    pub fn new(
        base_url: impl Into<String>,
        refresh_endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
        session: Arc<Session>,
    ) -> Self {
        let csrf = CsrfProtection::new(session.csrf().clone());
        Self::bearer_only(base_url, refresh_endpoint, transport, session).with_stage(Arc::new(csrf))
    }

    /// A pipeline that only attaches the bearer token. The auth API takes
    /// no anti-forgery header.
    pub fn bearer_only(
        base_url: impl Into<String>,
        refresh_endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
        session: Arc<Session>,
    ) -> Self {
        let stages: Vec<Arc<dyn RequestStage>> =
            vec![Arc::new(BearerAuth::new(session.tokens().clone()))];
        Self {
            base_url: base_url.into(),
            refresh_endpoint: refresh_endpoint.into(),
            transport,
            session,
            stages,
        }
    }

    /// Append a stage; it runs after the existing ones.
    pub fn with_stage(mut self, stage: Arc<dyn RequestStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn get(&self, path: &str) -> ApiRequest {
        ApiRequest::get(self.url(path))
    }

    pub fn post(&self, path: &str) -> ApiRequest {
        ApiRequest::post(self.url(path))
    }

    pub fn patch(&self, path: &str) -> ApiRequest {
        ApiRequest::patch(self.url(path))
    }

    pub fn delete(&self, path: &str) -> ApiRequest {
        ApiRequest::delete(self.url(path))
    }

    /// Send a request, recovering once from an expired access token.
    ///
    /// Non-success statuses come back as `Ok`; use
    /// [`ApiResponse::error_for_status`] to turn them into errors. `Err` is
    /// reserved for transport failures, refresh failures and a 401 on a
    /// replayed request.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let response = self.dispatch(request.clone()).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        if !request.refresh_allowed() {
            return Ok(response);
        }

        let request = request.mark_retried();
        debug!(method = %request.method(), url = request.url(), "Got 401, refreshing access token");
        match self.session.refresh().admit(request.clone()) {
            Admission::Leader(cycle) => self.lead_refresh(cycle, request).await,
            Admission::Queued(resume) => resume.await.unwrap_or(Err(ApiError::Aborted)),
        }
    }

    /// Execute and unwrap the envelope's `data`, classifying error statuses.
    pub async fn fetch_data<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        self.execute(request).await?.error_for_status()?.data()
    }

    /// Execute and require a success status, ignoring the body.
    pub async fn send_ok(&self, request: ApiRequest) -> Result<(), ApiError> {
        self.execute(request).await?.error_for_status()?;
        Ok(())
    }

    /// Run the outgoing stages, then the transport.
    async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut outgoing = request;
        for stage in &self.stages {
            outgoing = stage.apply(outgoing).await?;
        }
        self.transport.send(outgoing).await
    }

    async fn lead_refresh(
        &self,
        mut cycle: RefreshCycle<'_>,
        request: ApiRequest,
    ) -> Result<ApiResponse, ApiError> {
        let grant = match self.refresh_grant().await {
            Ok(grant) => grant,
            Err(err) => {
                warn!(error = %err, "Token refresh failed, clearing session");
                self.session.clear();
                cycle.fail(&err);
                return Err(err);
            }
        };

        if let Err(e) = self.session.store_grant(&grant) {
            // The token store keeps serving the new token from memory.
            warn!(error = %e, "Failed to persist refreshed access token");
        }
        info!("Access token refreshed");

        let token = grant.access_token;
        let own = self.replay(request, &token).await;

        while let Some(batch) = cycle.next_batch() {
            debug!(replays = batch.len(), "Replaying queued requests");
            let replays = batch.into_iter().map(|pending| {
                let token = token.as_str();
                async move {
                    let result = self.replay(pending.request, token).await;
                    if pending.resume.send(result).is_err() {
                        debug!("Queued caller went away before its replay finished");
                    }
                }
            });
            join_all(replays).await;
        }

        own
    }

    /// The refresh call goes straight to the transport. It carries its
    /// credential in the body, and no stage (the CSRF gate in particular)
    /// may hold it up or fail it.
    async fn refresh_grant(&self) -> Result<AuthResponse, ApiError> {
        let Some(refresh_token) = self.session.tokens().refresh_token() else {
            return Err(ApiError::NoRefreshToken);
        };
        let request = refresh_request(&self.refresh_endpoint, &refresh_token)?;
        let response = self.transport.send(request).await?;
        read_auth_response(response, REFRESH_FAILED)
    }

    /// Resend a retried request with the refreshed token. This is the only
    /// place a second 401 is decided: it is terminal.
    async fn replay(&self, request: ApiRequest, token: &str) -> Result<ApiResponse, ApiError> {
        debug_assert!(request.is_retried());
        let response = self.dispatch(request.bearer(token)?).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Replayed request rejected with the refreshed token");
            return Err(ApiError::Unauthorized);
        }
        Ok(response)
    }
}
