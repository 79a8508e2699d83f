//! Connector configuration.
//!
//! `InitOptions` is what an application passes to `X2Connector::init`. When
//! it names a `config_path`, the connector fetches a `RemoteConfig` document
//! from the backend instead and derives its settings from that.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::api::{ApiError, Middlewares};

/// Base URL used when neither the caller nor the remote config supplies one
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

pub const DEFAULT_ENVIRONMENT: &str = "DEV";

pub const PRODUCTION_ENVIRONMENT: &str = "PROD";

/// Transport-level settings shared by every request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl HttpConfig {
    pub fn header_map(&self) -> Result<HeaderMap, ApiError> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ApiError::InvalidHeader(format!("{}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ApiError::InvalidHeader(format!("{}: {}", name, e)))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApiSection {
    #[serde(default)]
    pub url: Option<String>,
}

/// Document served at `config_path`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    #[serde(default)]
    pub env: Option<String>,
    /// Inactivity window in milliseconds.
    #[serde(default)]
    pub token_duration: Option<u64>,
    #[serde(default)]
    pub api: Option<ApiSection>,
    #[serde(default)]
    pub http_config: Option<HttpConfig>,
}

impl RemoteConfig {
    /// `httpConfig.baseUrl`, then `api.url`, then the default.
    pub fn base_url(&self) -> String {
        self.http_config
            .as_ref()
            .and_then(|h| h.base_url.clone())
            .or_else(|| self.api.as_ref().and_then(|a| a.url.clone()))
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    /// A zero duration is ignored.
    pub fn token_duration(&self) -> Option<Duration> {
        self.token_duration
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn environment(&self) -> Option<&str> {
        self.env.as_deref().filter(|env| !env.is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub base_url: Option<String>,
    pub config_path: Option<String>,
    pub http_config: HttpConfig,
    pub middlewares: Middlewares,
}

impl InitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn http_config(mut self, http_config: HttpConfig) -> Self {
        self.http_config = http_config;
        self
    }

    pub fn middlewares(mut self, middlewares: Middlewares) -> Self {
        self.middlewares = middlewares;
        self
    }

    /// Base URL when no remote config is involved.
    pub fn local_base_url(&self) -> String {
        self.http_config
            .base_url
            .clone()
            .or_else(|| self.base_url.clone())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }
}
