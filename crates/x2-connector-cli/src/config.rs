//! CLI configuration management.
//!
//! Stores the backend location and the last email used to log in.
//! Configuration is stored at `~/.config/x2-connector/config.json`; the
//! `X2_*` environment variables (or a `.env` file) override it per run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use x2_connector_core::InitOptions;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "x2-connector";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const BASE_URL_ENV: &str = "X2_BASE_URL";
pub const CONFIG_PATH_ENV: &str = "X2_CONFIG_PATH";
pub const EMAIL_ENV: &str = "X2_EMAIL";
pub const PASSWORD_ENV: &str = "X2_PASSWORD";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    /// Remote config document; takes precedence over `base_url`.
    #[serde(default)]
    pub config_path: Option<String>,
    #[serde(default)]
    pub last_email: Option<String>,
}

impl CliConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `X2_BASE_URL` / `X2_CONFIG_PATH` overrides from `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v: &String| !v.trim().is_empty());
        if let Some(url) = non_empty(BASE_URL_ENV) {
            self.base_url = Some(url);
        }
        if let Some(path) = non_empty(CONFIG_PATH_ENV) {
            self.config_path = Some(path);
        }
        self
    }

    pub fn init_options(&self) -> InitOptions {
        let mut options = InitOptions::new();
        if let Some(ref url) = self.base_url {
            options = options.base_url(url.clone());
        }
        if let Some(ref path) = self.config_path {
            options = options.config_path(path.clone());
        }
        options
    }
}
