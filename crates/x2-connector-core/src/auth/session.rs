use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// In-memory authentication state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    /// Profile document from `/user/current`.
    pub profile: Option<Value>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Time left before the token expires; negative once it has.
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.token_expires_at.map(|at| at - now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.token_expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    AuthenticatedIdle,
    AuthenticatedWatching,
}

/// Session shared between the request pipeline and the lifecycle manager.
#[derive(Debug, Clone, Default)]
pub struct SharedSession {
    inner: Arc<Mutex<Session>>,
}

impl SharedSession {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Session {
        self.lock().clone()
    }

    pub fn token(&self) -> Option<String> {
        self.lock().token.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().is_authenticated()
    }

    pub fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.lock().token_expires_at
    }
}

/// Parse an expiry as sent by the server or read back from storage:
/// an RFC 3339 string, a string of epoch milliseconds, or a number of
/// epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.trim().parse::<i64>().ok().and_then(from_millis)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(from_millis),
        _ => None,
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
