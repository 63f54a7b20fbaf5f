//! HTTP layer: request values, the authenticated pipeline, and the typed
//! resource clients built on it.

mod envelope;
mod error;
mod middleware;
mod pipeline;
mod refresh;
mod request;
mod resources;
mod transport;

pub use envelope::{Envelope, Page, PageMeta};
pub use error::ApiError;
pub use middleware::{BearerAuth, CsrfProtection, RequestStage};
pub use pipeline::Pipeline;
pub use refresh::RefreshCoordinator;
pub use request::{ApiRequest, ApiResponse};
pub use resources::{
    dashboard_stats, public_profile, update_user_preferences, update_user_profile,
    user_preferences, user_profile, Resource, ResourceClient, DEFAULT_MESSAGE_LIMIT, DEFAULT_PAGE,
    DEFAULT_PAGE_SIZE, USER_PREFERENCES_PATH, USER_PROFILES_PATH,
};
pub use transport::{
    ReqwestTransport, RetryPolicy, Transport, INITIAL_BACKOFF_MS, MAX_RATE_LIMIT_RETRIES,
};
