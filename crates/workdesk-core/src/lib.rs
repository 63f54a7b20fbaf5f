//! Client library for the Workdesk management and auth APIs.
//!
//! The interesting part is the authenticated request pipeline
//! ([`api::Pipeline`]): it attaches bearer and CSRF tokens, notices expired
//! access tokens, runs a single refresh per session no matter how many
//! requests fail at once, and replays the waiting requests in order.
//!
//! ```no_run
//! use std::sync::Arc;
//! use workdesk_core::{ApiConfig, Config, ExecutionContext, KeyringStorage, Workdesk};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ApiConfig::from_env(&Config::load()?);
//! let storage = Arc::new(KeyringStorage::new(workdesk_core::auth::DEFAULT_SERVICE));
//! let workdesk = Workdesk::new(config, ExecutionContext::Client, storage)?;
//! let projects = workdesk.projects().list(1, 10).await?;
//! println!("{} projects", projects.meta.total);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod models;
mod utils;

#[cfg(test)]
mod testing;

pub use api::{ApiError, Page, PageMeta, Pipeline, Resource, ResourceClient};
pub use auth::{
    AuthClient, AuthSnapshot, AuthState, CredentialStorage, ExecutionContext, FileStorage,
    KeyringStorage, MemoryStorage, NoopStorage, Session,
};
pub use client::Workdesk;
pub use config::{ApiConfig, Config};
