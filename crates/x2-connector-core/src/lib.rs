//! x2-connector core library.
//!
//! An authenticated HTTP client for the x2 backend: a request pipeline that
//! attaches the session token, and a session lifecycle manager that renews
//! the token ahead of expiry and expires the session after a period of user
//! inactivity.
//!
//! ```no_run
//! # async fn run() -> Result<(), x2_connector_core::ApiError> {
//! use x2_connector_core::{EventKind, InitOptions, X2Connector};
//!
//! let x2 = X2Connector::new()?;
//! x2.init(InitOptions::new().base_url("https://api.example.com")).await?;
//! x2.subscribe(EventKind::SessionExpired, |_| eprintln!("session expired"));
//! x2.login("user@example.com", "secret").await?;
//! let activity = x2.watch_for_inactivity();
//! activity.record_activity();
//! let me = x2.get_session().await?;
//! # let _ = me;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod connector;
pub mod events;
pub mod storage;

pub use api::{ApiClient, ApiError, ApiResponse, Middlewares, RequestConfig, ResponseBody, Transport, TransportError};
pub use auth::{ActivityMonitor, Session, SessionManager, SessionSettings, SessionState};
pub use clock::{Clock, SystemClock, TokioClock};
pub use config::{HttpConfig, InitOptions, RemoteConfig};
pub use connector::{X2Connector, X2ConnectorBuilder};
pub use events::{Event, EventKind, Notifier, RequestTarget, Subscription};
pub use storage::{FileBackend, MemoryBackend, PersistentSession, StorageBackend, StorageError};

// Re-exported so callers can name methods and headers without a direct reqwest dependency.
pub use reqwest::{header, Method, StatusCode};
