use std::sync::Arc;

use tracing::{debug, info, warn};

use super::Session;
use crate::api::{ApiError, ApiRequest, ApiResponse, Pipeline};
use crate::models::{
    AuthResponse, ChangePasswordRequest, LoginRequest, LogoutRequest, Profile,
    ProfileUpdateRequest, RefreshTokenRequest, RegisterRequest, User,
};

/// Path of the auth routes under the auth API base URL.
pub const AUTH_PATH: &str = "/auth";

pub(crate) const REFRESH_FAILED: &str = "Token refresh failed";
const LOGIN_FAILED: &str = "Login failed";
const REGISTER_FAILED: &str = "Registration failed";
const LOGOUT_FAILED: &str = "Logout failed";

/// Build the refresh call. It never triggers a refresh of its own.
pub(crate) fn refresh_request(endpoint: &str, refresh_token: &str) -> Result<ApiRequest, ApiError> {
    let body = RefreshTokenRequest {
        refresh_token: refresh_token.to_string(),
    };
    Ok(ApiRequest::post(endpoint).json(&body)?.without_refresh())
}

/// Turn a login/register/refresh response into a grant. Failures carry the
/// server's message, or `fallback` when it sent none.
pub(crate) fn read_auth_response(
    response: ApiResponse,
    fallback: &str,
) -> Result<AuthResponse, ApiError> {
    require_success(response, fallback)?.data()
}

fn require_success(response: ApiResponse, fallback: &str) -> Result<ApiResponse, ApiError> {
    if response.is_success() {
        return Ok(response);
    }
    let message = response
        .server_message()
        .unwrap_or_else(|| fallback.to_string());
    debug!(status = %response.status(), message = %message, "Auth call rejected");
    Err(ApiError::Auth(message))
}

/// Login, registration and account calls against the auth API.
#[derive(Clone)]
pub struct AuthClient {
    pipeline: Pipeline,
}

impl AuthClient {
    /// `pipeline` must be rooted at `{auth api}/auth`, usually built with
    /// [`Pipeline::bearer_only`].
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    pub fn session(&self) -> &Arc<Session> {
        self.pipeline.session()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_authenticated()
    }

    /// Exchange credentials for tokens and store them.
    pub async fn login(&self, credentials: &LoginRequest) -> Result<AuthResponse, ApiError> {
        let request = self
            .pipeline
            .post("/login")
            .json(credentials)?
            .without_refresh();
        let grant = read_auth_response(self.pipeline.execute(request).await?, LOGIN_FAILED)?;
        self.session().store_grant(&grant)?;
        info!(email = %credentials.email, "Logged in");
        Ok(grant)
    }

    pub async fn register(&self, details: &RegisterRequest) -> Result<AuthResponse, ApiError> {
        let request = self
            .pipeline
            .post("/register")
            .json(details)?
            .without_refresh();
        let grant = read_auth_response(self.pipeline.execute(request).await?, REGISTER_FAILED)?;
        self.session().store_grant(&grant)?;
        info!(email = %details.email, "Registered");
        Ok(grant)
    }

    /// Trade a refresh token for a new grant. Nothing is stored.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<AuthResponse, ApiError> {
        let request = refresh_request(&self.pipeline.url("/refresh"), refresh_token)?;
        read_auth_response(self.pipeline.execute(request).await?, REFRESH_FAILED)
    }

    /// Revoke the refresh token server-side and forget local credentials.
    ///
    /// Local state is cleared even when the server call fails; the failure
    /// is still returned.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let result = match self.session().tokens().refresh_token() {
            Some(refresh_token) => self.revoke(refresh_token).await,
            None => Ok(()),
        };
        self.session().clear();
        match &result {
            Ok(()) => info!("Logged out"),
            Err(e) => warn!(error = %e, "Server-side logout failed, local session cleared"),
        }
        result
    }

    async fn revoke(&self, refresh_token: String) -> Result<(), ApiError> {
        let request = self
            .pipeline
            .post("/logout")
            .json(&LogoutRequest { refresh_token })?
            .without_refresh();
        require_success(self.pipeline.execute(request).await?, LOGOUT_FAILED)?;
        Ok(())
    }

    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.pipeline.fetch_data(self.pipeline.get("/me")).await
    }

    pub async fn profile(&self) -> Result<Profile, ApiError> {
        self.pipeline.fetch_data(self.pipeline.get("/profile")).await
    }

    pub async fn update_profile(&self, update: &ProfileUpdateRequest) -> Result<Profile, ApiError> {
        let request = self.pipeline.patch("/profile").json(update)?;
        self.pipeline.fetch_data(request).await
    }

    pub async fn change_password(&self, change: &ChangePasswordRequest) -> Result<(), ApiError> {
        let request = self.pipeline.post("/change-password").json(change)?;
        self.pipeline.send_ok(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CsrfCache, ExecutionContext, MemoryStorage, TokenStore, CSRF_HEADER};
    use crate::testing::{json, network_error, MockTransport, Reply};
    use reqwest::header::{HeaderMap, HeaderValue};
    use reqwest::StatusCode;
    use serde_json::json;

    fn client(transport: Arc<MockTransport>) -> (Arc<MemoryStorage>, AuthClient) {
        let storage = Arc::new(MemoryStorage::new());
        let tokens = TokenStore::new(ExecutionContext::Client, storage.clone());
        let csrf = Arc::new(CsrfCache::new(transport.clone(), "http://mgmt/api/v1/csrf-token"));
        let session = Arc::new(Session::new(tokens, csrf));
        let pipeline = Pipeline::bearer_only(
            "http://auth/api/v1/auth",
            "http://auth/api/v1/auth/refresh",
            transport,
            session,
        );
        (storage, AuthClient::new(pipeline))
    }

    fn with_csrf(reply: impl Fn(&ApiRequest) -> Reply + Send + Sync + 'static) -> Arc<MockTransport> {
        MockTransport::new(move |request| {
            if request.url().ends_with("/csrf-token") {
                let mut headers = HeaderMap::new();
                headers.insert(CSRF_HEADER, HeaderValue::from_static("csrf-1"));
                Reply::Ready(Ok(ApiResponse::new(StatusCode::OK, headers, "{}")))
            } else {
                reply(request)
            }
        })
    }

    fn login_request() -> LoginRequest {
        LoginRequest {
            email: "ada@example.com".to_string(),
            password: "hunter2".to_string(),
        }
    }

    #[tokio::test]
    async fn test_login_stores_both_tokens() {
        let transport = with_csrf(|_| {
            json(
                200,
                json!({"success": true, "data": {
                    "user": {"id": "u1", "email": "ada@example.com"},
                    "accessToken": "acc", "refreshToken": "ref", "expiresIn": 900
                }}),
            )
        });
        let (_storage, auth) = client(transport.clone());

        let grant = auth.login(&login_request()).await.unwrap();
        assert_eq!(grant.user.unwrap().id, "u1");
        assert!(auth.is_authenticated());
        assert_eq!(auth.session().tokens().refresh_token().as_deref(), Some("ref"));

        let sent = transport
            .calls()
            .into_iter()
            .find(|r| r.url().ends_with("/auth/login"))
            .unwrap();
        assert_eq!(
            sent.body(),
            Some(&json!({"email": "ada@example.com", "password": "hunter2"}))
        );
        assert!(sent.header_value(CSRF_HEADER).is_none());
        assert_eq!(transport.count("/csrf-token"), 0);
    }

    #[tokio::test]
    async fn test_login_failure_uses_server_message_then_fallback() {
        let transport = with_csrf(|_| {
            json(401, json!({"success": false, "message": "Invalid credentials"}))
        });
        let (_storage, auth) = client(transport.clone());
        let err = auth.login(&login_request()).await.unwrap_err();
        assert!(matches!(err, ApiError::Auth(ref m) if m == "Invalid credentials"));
        assert_eq!(transport.count("/auth/refresh"), 0);

        let transport = with_csrf(|_| {
            Reply::Ready(Ok(ApiResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                HeaderMap::new(),
                "oops",
            )))
        });
        let (_storage, auth) = client(transport);
        let err = auth.login(&login_request()).await.unwrap_err();
        assert!(matches!(err, ApiError::Auth(ref m) if m == "Login failed"));
        assert!(!auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_register_stores_tokens() {
        let transport = with_csrf(|_| {
            json(
                201,
                json!({"success": true, "data": {"accessToken": "acc", "refreshToken": "ref"}}),
            )
        });
        let (_storage, auth) = client(transport);
        let details = RegisterRequest {
            email: "ada@example.com".to_string(),
            password: "hunter2".to_string(),
            username: "ada".to_string(),
            first_name: None,
            last_name: None,
        };
        auth.register(&details).await.unwrap();
        assert!(auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_refresh_access_token_does_not_store() {
        let transport = with_csrf(|_| {
            json(200, json!({"success": true, "data": {"accessToken": "fresh"}}))
        });
        let (storage, auth) = client(transport);
        let grant = auth.refresh_access_token("ref").await.unwrap();
        assert_eq!(grant.access_token, "fresh");
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_logout_clears_local_state_even_on_network_failure() {
        let transport = with_csrf(|_| Reply::Ready(Err(network_error())));
        let (storage, auth) = client(transport.clone());
        let tokens = auth.session().tokens();
        tokens.set_access_token("acc", chrono::Duration::hours(1)).unwrap();
        tokens.set_refresh_token("ref", chrono::Duration::days(1)).unwrap();

        let err = auth.logout().await.unwrap_err();
        assert!(err.is_network());
        assert!(storage.is_empty());
        assert_eq!(transport.count("/auth/logout"), 1);
    }

    #[tokio::test]
    async fn test_logout_without_refresh_token_skips_server() {
        let transport = with_csrf(|_| json(200, json!({"success": true})));
        let (storage, auth) = client(transport.clone());
        auth.session()
            .tokens()
            .set_access_token("acc", chrono::Duration::hours(1))
            .unwrap();

        auth.logout().await.unwrap();
        assert!(storage.is_empty());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_current_user_unwraps_envelope() {
        let transport = with_csrf(|request| {
            assert!(request.url().ends_with("/auth/me"));
            json(200, json!({"success": true, "data": {"id": "u1", "email": "a@b.c"}}))
        });
        let (_storage, auth) = client(transport);
        let user = auth.current_user().await.unwrap();
        assert_eq!(user.email, "a@b.c");
    }

    #[tokio::test]
    async fn test_update_profile_patches() {
        let transport = with_csrf(|request| {
            assert_eq!(request.method(), &reqwest::Method::PATCH);
            json(200, json!({"success": true, "data": {"id": "p1", "bio": "Hi"}}))
        });
        let (_storage, auth) = client(transport);
        let update = ProfileUpdateRequest {
            bio: Some("Hi".to_string()),
            ..Default::default()
        };
        let profile = auth.update_profile(&update).await.unwrap();
        assert_eq!(profile.bio.as_deref(), Some("Hi"));
    }

    #[tokio::test]
    async fn test_change_password_surfaces_validation_error() {
        let transport = with_csrf(|_| {
            json(400, json!({"success": false, "message": "Old password is incorrect"}))
        });
        let (_storage, auth) = client(transport);
        let change = ChangePasswordRequest {
            old_password: "a".to_string(),
            new_password: "b".to_string(),
        };
        let err = auth.change_password(&change).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
        assert!(err.to_string().contains("Old password is incorrect"));
    }
}
