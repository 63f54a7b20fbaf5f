//! Typed CRUD clients over the management API.
//!
//! Every resource exposes the same REST surface under its endpoint:
//!
//! | Operation | Request              | Body                   |
//! |-----------|----------------------|------------------------|
//! | create    | `POST /`             | envelope of `R`        |
//! | list      | `GET /?page&limit`   | `{data: [R], meta}`    |
//! | get       | `GET /:id`           | envelope of `R`        |
//! | update    | `PATCH /:id`         | envelope of `R`        |
//! | delete    | `DELETE /:id`        | ignored                |

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use super::envelope::Page;
use super::pipeline::Pipeline;
use super::ApiError;
use crate::models::{
    ApiKey, Chat, ChatMessage, DashboardStats, FinanceEntry, FinanceReport, Project,
    ProjectStatus, ScheduledTask, TaskStatus, Testimonial, UserPreferences, UserProfile,
};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Messages fetched per chat when no limit is given.
pub const DEFAULT_MESSAGE_LIMIT: u32 = 50;

pub const USER_PROFILES_PATH: &str = "/user-profiles";
pub const USER_PREFERENCES_PATH: &str = "/user-preferences";

/// A management API resource with a standard CRUD endpoint.
pub trait Resource: DeserializeOwned + Send {
    /// Path under the management API base URL, with a leading slash.
    const ENDPOINT: &'static str;
}

pub struct ResourceClient<R> {
    pipeline: Pipeline,
    endpoint: String,
    _resource: PhantomData<fn() -> R>,
}

impl<R> Clone for ResourceClient<R> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            endpoint: self.endpoint.clone(),
            _resource: PhantomData,
        }
    }
}

impl<R: Resource> ResourceClient<R> {
    pub fn new(pipeline: Pipeline) -> Self {
        Self::at(pipeline, R::ENDPOINT)
    }
}

impl<R: DeserializeOwned> ResourceClient<R> {
    /// A client for a resource mounted somewhere other than its usual
    /// endpoint.
    pub fn at(pipeline: Pipeline, endpoint: impl Into<String>) -> Self {
        Self {
            pipeline,
            endpoint: endpoint.into(),
            _resource: PhantomData,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn path(&self, suffix: &str) -> String {
        format!("{}{}", self.endpoint, suffix)
    }

    fn item(&self, id: &str) -> String {
        self.path(&format!("/{}", id))
    }

    pub async fn create<B: Serialize + ?Sized>(&self, body: &B) -> Result<R, ApiError> {
        let request = self.pipeline.post(&self.endpoint).json(body)?;
        self.pipeline.fetch_data(request).await
    }

    /// One page of resources. The list body is not wrapped in an envelope.
    pub async fn list(&self, page: u32, limit: u32) -> Result<Page<R>, ApiError> {
        let request = self
            .pipeline
            .get(&self.endpoint)
            .query("page", page)
            .query("limit", limit);
        let page: Page<R> = self.pipeline.execute(request).await?.error_for_status()?.json()?;
        debug!(
            endpoint = %self.endpoint,
            items = page.data.len(),
            total = page.meta.total,
            "Fetched page"
        );
        Ok(page)
    }

    /// Page through the whole collection, stopping at the last page.
    pub async fn list_all(&self, limit: u32) -> Result<Vec<R>, ApiError> {
        let mut items = Vec::new();
        let mut page = DEFAULT_PAGE;
        loop {
            let batch = self.list(page, limit).await?;
            let more = batch.has_next() && !batch.data.is_empty();
            items.extend(batch.data);
            if !more {
                return Ok(items);
            }
            page += 1;
        }
    }

    pub async fn get(&self, id: &str) -> Result<R, ApiError> {
        self.pipeline.fetch_data(self.pipeline.get(&self.item(id))).await
    }

    /// Partial update; only the fields present in `body` change.
    pub async fn update<B: Serialize + ?Sized>(&self, id: &str, body: &B) -> Result<R, ApiError> {
        let request = self.pipeline.patch(&self.item(id)).json(body)?;
        self.pipeline.fetch_data(request).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.pipeline.send_ok(self.pipeline.delete(&self.item(id))).await
    }
}

impl ResourceClient<Project> {
    pub async fn get_by_slug(&self, slug: &str) -> Result<Project, ApiError> {
        let request = self.pipeline.get(&self.path(&format!("/slug/{}", slug)));
        self.pipeline.fetch_data(request).await
    }

    pub async fn update_status(&self, id: &str, status: ProjectStatus) -> Result<Project, ApiError> {
        let request = self
            .pipeline
            .patch(&self.path(&format!("/{}/status", id)))
            .json(&json!({ "status": status }))?;
        self.pipeline.fetch_data(request).await
    }

    /// Projects whose slug matches `query`.
    pub async fn search_by_slug(&self, query: &str) -> Result<Vec<Project>, ApiError> {
        let request = self.pipeline.get(&self.path("/slug")).query("q", query);
        self.pipeline.fetch_data(request).await
    }

    pub async fn update_metrics<B: Serialize + ?Sized>(
        &self,
        id: &str,
        metrics: &B,
    ) -> Result<Project, ApiError> {
        let request = self
            .pipeline
            .patch(&self.path(&format!("/{}/metrics", id)))
            .json(metrics)?;
        self.pipeline.fetch_data(request).await
    }

    pub async fn duplicate(&self, id: &str) -> Result<Project, ApiError> {
        let request = self
            .pipeline
            .post(&self.path(&format!("/{}/duplicate", id)))
            .json(&json!({}))?;
        self.pipeline.fetch_data(request).await
    }
}

impl ResourceClient<FinanceEntry> {
    /// Income/expense totals for a period such as `"2026-03"`.
    pub async fn report(&self, period: &str) -> Result<FinanceReport, ApiError> {
        let request = self.pipeline.get(&self.path("/report")).query("period", period);
        self.pipeline.fetch_data(request).await
    }

    pub async fn by_category(
        &self,
        category: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<FinanceEntry>, ApiError> {
        let request = self
            .pipeline
            .get(&self.path(&format!("/category/{}", category)))
            .query("page", page)
            .query("limit", limit);
        self.pipeline.execute(request).await?.error_for_status()?.json()
    }
}

impl ResourceClient<Chat> {
    pub async fn send_message(&self, chat_id: &str, content: &str) -> Result<ChatMessage, ApiError> {
        let request = self
            .pipeline
            .post(&self.path(&format!("/{}/messages", chat_id)))
            .json(&json!({ "content": content }))?;
        self.pipeline.fetch_data(request).await
    }

    pub async fn messages(&self, chat_id: &str, limit: Option<u32>) -> Result<Vec<ChatMessage>, ApiError> {
        let request = self
            .pipeline
            .get(&self.path(&format!("/{}/messages", chat_id)))
            .query("limit", limit.unwrap_or(DEFAULT_MESSAGE_LIMIT));
        self.pipeline.fetch_data(request).await
    }
}

impl ResourceClient<Testimonial> {
    /// Testimonials marked public, readable without an account.
    pub async fn list_public(&self, page: u32, limit: u32) -> Result<Page<Testimonial>, ApiError> {
        let request = self
            .pipeline
            .get(&self.path("/public"))
            .query("page", page)
            .query("limit", limit);
        self.pipeline.execute(request).await?.error_for_status()?.json()
    }
}

impl ResourceClient<ApiKey> {
    /// Revoke a key. The server deletes it.
    pub async fn revoke(&self, id: &str) -> Result<(), ApiError> {
        self.delete(id).await
    }
}

impl ResourceClient<ScheduledTask> {
    pub async fn complete_task(&self, id: &str) -> Result<ScheduledTask, ApiError> {
        self.update(id, &json!({ "status": TaskStatus::Completed }))
            .await
    }
}

pub async fn user_profile(pipeline: &Pipeline) -> Result<UserProfile, ApiError> {
    pipeline.fetch_data(pipeline.get(USER_PROFILES_PATH)).await
}

pub async fn update_user_profile<B: Serialize + ?Sized>(
    pipeline: &Pipeline,
    update: &B,
) -> Result<UserProfile, ApiError> {
    let request = pipeline.patch(USER_PROFILES_PATH).json(update)?;
    pipeline.fetch_data(request).await
}

pub async fn public_profile(pipeline: &Pipeline, user_id: &str) -> Result<UserProfile, ApiError> {
    let path = format!("{}/public/{}", USER_PROFILES_PATH, user_id);
    pipeline.fetch_data(pipeline.get(&path)).await
}

pub async fn user_preferences(pipeline: &Pipeline) -> Result<UserPreferences, ApiError> {
    pipeline.fetch_data(pipeline.get(USER_PREFERENCES_PATH)).await
}

pub async fn update_user_preferences<B: Serialize + ?Sized>(
    pipeline: &Pipeline,
    update: &B,
) -> Result<UserPreferences, ApiError> {
    let request = pipeline.patch(USER_PREFERENCES_PATH).json(update)?;
    pipeline.fetch_data(request).await
}

/// Aggregate counters for the dashboard. A response without `data` yields
/// empty stats rather than an error.
pub async fn dashboard_stats(pipeline: &Pipeline) -> Result<DashboardStats, ApiError> {
    let response = pipeline
        .execute(pipeline.get("/dashboard"))
        .await?
        .error_for_status()?;
    let envelope = response.envelope::<DashboardStats>()?;
    Ok(envelope.data.unwrap_or_default())
}
