//! Wall-clock source used to turn `tokenExpiresAt` into a timer delay.

use std::fmt::Debug;

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall time anchored to tokio's monotonic clock.
///
/// Reads advance exactly as tokio timers do, including under a paused
/// test runtime. Must be created inside a tokio runtime.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    wall_anchor: DateTime<Utc>,
    instant_anchor: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    pub fn anchored_at(wall_anchor: DateTime<Utc>) -> Self {
        Self {
            wall_anchor,
            instant_anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now() - self.instant_anchor;
        self.wall_anchor + chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero())
    }
}
