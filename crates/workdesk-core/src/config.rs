//! Application configuration management.
//!
//! Two layers live here. [`Config`] is the small JSON file the CLI keeps at
//! `~/.config/workdesk/config.json` (API URL overrides and the last e-mail
//! used to log in). [`ApiConfig`] is the resolved runtime configuration:
//! environment first, then the config file, then local development
//! defaults.

use std::path::PathBuf;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::RetryPolicy;
use crate::auth::{default_access_ttl, default_refresh_ttl};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "workdesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const MANAGEMENT_URL_VAR: &str = "WORKDESK_MANAGEMENT_API_URL";
pub const AUTH_URL_VAR: &str = "WORKDESK_AUTH_API_URL";

pub const DEFAULT_MANAGEMENT_URL: &str = "http://localhost:3012";
pub const DEFAULT_AUTH_URL: &str = "http://localhost:3010";

/// Versioned prefix appended to both base URLs.
pub const API_PREFIX: &str = "/api/v1";

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    pub management_api_url: Option<String>,
    pub auth_api_url: Option<String>,
    pub last_email: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

/// Strip one trailing slash and append the versioned prefix.
pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim();
    let base = trimmed.strip_suffix('/').unwrap_or(trimmed);
    format!("{}{}", base, API_PREFIX)
}

/// Resolved settings for one client.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    /// Normalized management API base, e.g. `http://localhost:3012/api/v1`.
    pub management_api_url: String,
    /// Normalized auth API base, e.g. `http://localhost:3010/api/v1`.
    pub auth_api_url: String,
    pub request_timeout: StdDuration,
    pub retry: RetryPolicy,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::with_urls(DEFAULT_MANAGEMENT_URL, DEFAULT_AUTH_URL)
    }
}

impl ApiConfig {
    /// Raw (unnormalized) base URLs, e.g. a test server's address.
    pub fn with_urls(management_url: &str, auth_url: &str) -> Self {
        Self {
            management_api_url: normalize_base_url(management_url),
            auth_api_url: normalize_base_url(auth_url),
            request_timeout: StdDuration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            access_ttl: default_access_ttl(),
            refresh_ttl: default_refresh_ttl(),
        }
    }

    /// Environment variables over the config file over defaults.
    pub fn from_env(file: &Config) -> Self {
        Self::resolve(|name| std::env::var(name).ok(), file)
    }

    pub fn resolve(env: impl Fn(&str) -> Option<String>, file: &Config) -> Self {
        let pick = |var: &str, from_file: &Option<String>, fallback: &str| {
            env(var)
                .filter(|v| !v.trim().is_empty())
                .or_else(|| from_file.clone())
                .unwrap_or_else(|| fallback.to_string())
        };
        let management = pick(MANAGEMENT_URL_VAR, &file.management_api_url, DEFAULT_MANAGEMENT_URL);
        let auth = pick(AUTH_URL_VAR, &file.auth_api_url, DEFAULT_AUTH_URL);
        let config = Self::with_urls(&management, &auth);
        debug!(
            management = %config.management_api_url,
            auth = %config.auth_api_url,
            "Resolved API configuration"
        );
        config
    }

    pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// `{auth}/auth`, the root of the auth routes.
    pub fn auth_routes_url(&self) -> String {
        format!("{}{}", self.auth_api_url, crate::auth::AUTH_PATH)
    }

    pub fn refresh_url(&self) -> String {
        format!("{}/refresh", self.auth_routes_url())
    }

    pub fn csrf_url(&self) -> String {
        format!("{}{}", self.management_api_url, crate::auth::CSRF_PATH)
    }
}
