use thiserror::Error;

use crate::storage::StorageError;

/// Failure raised by a `Transport` before any response was obtained.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("{0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] TransportError),

    #[error("HTTP {status} {status_text}: {body}")]
    Http {
        status: u16,
        status_text: String,
        body: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Token renewal failed: {0}")]
    Renewal(#[source] Box<ApiError>),

    #[error("Failed to fetch remote config from {path}: {source}")]
    ConfigFetch {
        path: String,
        #[source]
        source: Box<ApiError>,
    },

    #[error("Session storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Failed to encode request body: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        ApiError::Http {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
            body: Self::truncate_body(body),
        }
    }

    /// HTTP status carried by this error, looking through renewal/config wrappers.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Renewal(inner) => inner.status(),
            ApiError::ConfigFetch { source, .. } => source.status(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(400..=499))
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(500..=599))
    }

    pub fn is_network(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::Renewal(inner) => inner.is_network(),
            ApiError::ConfigFetch { source, .. } => source.is_network(),
            _ => false,
        }
    }
}
