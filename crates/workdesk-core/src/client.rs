use std::sync::Arc;

use tracing::info;

use crate::api::{
    dashboard_stats, update_user_preferences, update_user_profile, user_preferences,
    user_profile, ApiError, Pipeline, ReqwestTransport, Resource, ResourceClient, Transport,
};
use crate::auth::{
    AuthClient, AuthState, CredentialStorage, CsrfCache, ExecutionContext, Session, TokenStore,
};
use crate::config::ApiConfig;
use crate::models::{
    ApiKey, Certification, Chat, Client, DashboardStats, Experience, FinanceEntry, Idea,
    Language, Project, ScheduledTask, Testimonial, UserPreferences, UserProfile,
};

/// One signed-in (or signed-out) client of both backends.
///
/// All pipelines handed out by a `Workdesk` share its [`Session`], so a 401
/// anywhere triggers at most one refresh. Separate `Workdesk` values are
/// fully independent.
#[derive(Clone)]
pub struct Workdesk {
    config: ApiConfig,
    session: Arc<Session>,
    management: Pipeline,
    auth: AuthClient,
}

impl Workdesk {
    pub fn new(
        config: ApiConfig,
        context: ExecutionContext,
        storage: Arc<dyn CredentialStorage>,
    ) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new(config.request_timeout, config.retry)?;
        Ok(Self::with_transport(config, context, storage, Arc::new(transport)))
    }

    pub fn with_transport(
        config: ApiConfig,
        context: ExecutionContext,
        storage: Arc<dyn CredentialStorage>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let tokens = TokenStore::new(context, storage);
        let csrf = Arc::new(CsrfCache::new(transport.clone(), config.csrf_url()));
        let session = Arc::new(
            Session::new(tokens, csrf).with_ttls(config.access_ttl, config.refresh_ttl),
        );

        let refresh_url = config.refresh_url();
        let management = Pipeline::new(
            config.management_api_url.clone(),
            refresh_url.clone(),
            transport.clone(),
            session.clone(),
        );
        let auth = AuthClient::new(Pipeline::bearer_only(
            config.auth_routes_url(),
            refresh_url,
            transport,
            session.clone(),
        ));

        info!(
            management = %config.management_api_url,
            auth = %config.auth_api_url,
            context = ?context,
            "Client initialized"
        );
        Self {
            config,
            session,
            management,
            auth,
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn auth(&self) -> &AuthClient {
        &self.auth
    }

    /// A fresh observable auth state over this client.
    pub fn auth_state(&self) -> AuthState {
        AuthState::new(self.auth.clone())
    }

    /// The management API pipeline, for endpoints without a typed client.
    pub fn management(&self) -> &Pipeline {
        &self.management
    }

    pub fn resource<R: Resource>(&self) -> ResourceClient<R> {
        ResourceClient::new(self.management.clone())
    }

    pub fn projects(&self) -> ResourceClient<Project> {
        self.resource()
    }

    pub fn ideas(&self) -> ResourceClient<Idea> {
        self.resource()
    }

    pub fn clients(&self) -> ResourceClient<Client> {
        self.resource()
    }

    pub fn finances(&self) -> ResourceClient<FinanceEntry> {
        self.resource()
    }

    pub fn experiences(&self) -> ResourceClient<Experience> {
        self.resource()
    }

    pub fn chats(&self) -> ResourceClient<Chat> {
        self.resource()
    }

    pub fn scheduler(&self) -> ResourceClient<ScheduledTask> {
        self.resource()
    }

    pub fn testimonials(&self) -> ResourceClient<Testimonial> {
        self.resource()
    }

    pub fn certifications(&self) -> ResourceClient<Certification> {
        self.resource()
    }

    pub fn languages(&self) -> ResourceClient<Language> {
        self.resource()
    }

    pub fn api_keys(&self) -> ResourceClient<ApiKey> {
        self.resource()
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats, ApiError> {
        dashboard_stats(&self.management).await
    }

    /// The management API's profile record, distinct from the auth API's
    /// [`AuthClient::profile`].
    pub async fn user_profile(&self) -> Result<UserProfile, ApiError> {
        user_profile(&self.management).await
    }

    pub async fn update_user_profile(
        &self,
        update: &serde_json::Value,
    ) -> Result<UserProfile, ApiError> {
        update_user_profile(&self.management, update).await
    }

    pub async fn user_preferences(&self) -> Result<UserPreferences, ApiError> {
        user_preferences(&self.management).await
    }

    pub async fn update_user_preferences(
        &self,
        update: &serde_json::Value,
    ) -> Result<UserPreferences, ApiError> {
        update_user_preferences(&self.management, update).await
    }
}
