//! Authentication module for managing the login session.
//!
//! This module provides:
//! - `Session`: token, expiry and profile held in memory
//! - `SessionManager`: login, renewal scheduling, inactivity detection, logout
//! - `ActivityMonitor`: the flag host input handlers set on user activity
//! - `TimerHandle`: cancellable timers the manager schedules

pub mod activity;
pub mod lifecycle;
pub mod session;
pub mod timer;

pub use activity::ActivityMonitor;
pub use lifecycle::{SessionManager, SessionSettings, DEFAULT_TOKEN_DURATION, INACTIVITY_CHECK_INTERVAL};
pub use session::{Session, SessionState, SharedSession};
pub use timer::TimerHandle;
