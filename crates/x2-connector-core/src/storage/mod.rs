//! Persistent session storage.
//!
//! This module provides:
//! - `StorageBackend`: a string key/value store (`MemoryBackend`, `FileBackend`)
//! - `PersistentSession`: JSON-aware access to the keys the connector persists
//!
//! Strings are stored verbatim; any other JSON value is encoded on write and
//! decoded on read.

pub mod backend;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

pub use backend::{FileBackend, MemoryBackend, StorageBackend};

pub const TOKEN_KEY: &str = "token";
pub const TOKEN_EXPIRES_AT_KEY: &str = "tokenExpiresAt";
pub const SESSION_KEY: &str = "session";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage contents are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not find cache directory")]
    NoCacheDir,
}

#[derive(Clone)]
pub struct PersistentSession {
    backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for PersistentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentSession").finish_non_exhaustive()
    }
}

impl PersistentSession {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Read a value. Missing keys yield `Ok(None)`; stored text that is
    /// not JSON comes back as a string.
    pub fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.backend.get(key)?.map(|raw| {
            serde_json::from_str(&raw).unwrap_or(Value::String(raw))
        }))
    }

    /// Read the raw stored text without decoding.
    pub fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.backend.get(key)
    }

    pub fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        match value {
            Value::String(s) => self.backend.set(key, s),
            other => self.backend.set(key, &serde_json::to_string(other)?),
        }
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.backend.remove(key)
    }

    // ===== Session keys =====

    pub fn token(&self) -> Result<Option<String>, StorageError> {
        Ok(self.get_raw(TOKEN_KEY)?.filter(|t| !t.is_empty()))
    }

    /// Stored expiry; an unparseable value is treated as absent.
    pub fn token_expires_at(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self
            .get(TOKEN_EXPIRES_AT_KEY)?
            .and_then(|v| crate::auth::session::parse_timestamp(&v)))
    }

    /// Token and expiry are written together, so a failed save never pairs
    /// the new token with an old expiry.
    pub fn save_token(&self, token: &str, expires_at: Option<DateTime<Utc>>) -> Result<(), StorageError> {
        let expires_at = expires_at.map(|at| at.to_rfc3339());
        self.backend.apply(&[
            (TOKEN_KEY, Some(token)),
            (TOKEN_EXPIRES_AT_KEY, expires_at.as_deref()),
        ])
    }

    pub fn save_token_expires_at(&self, expires_at: Option<DateTime<Utc>>) -> Result<(), StorageError> {
        match expires_at {
            Some(at) => self.backend.set(TOKEN_EXPIRES_AT_KEY, &at.to_rfc3339()),
            None => self.backend.remove(TOKEN_EXPIRES_AT_KEY),
        }
    }

    pub fn clear_token(&self) -> Result<(), StorageError> {
        self.backend.apply(&[(TOKEN_KEY, None), (TOKEN_EXPIRES_AT_KEY, None)])
    }

    pub fn save_profile(&self, profile: &Value) -> Result<(), StorageError> {
        self.set(SESSION_KEY, profile)
    }

    pub fn profile(&self) -> Result<Option<Value>, StorageError> {
        self.get(SESSION_KEY)
    }
}
