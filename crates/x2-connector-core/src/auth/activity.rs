use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Activity signal shared with the host application.
///
/// The host calls [`ActivityMonitor::record_activity`] from its input
/// handlers (key presses, pointer movement, a line typed on stdin). The
/// inactivity check consumes the flag on every tick.
#[derive(Debug, Clone, Default)]
pub struct ActivityMonitor {
    detected: Arc<AtomicBool>,
}

impl ActivityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_activity(&self) {
        self.detected.store(true, Ordering::SeqCst);
    }

    /// Whether activity was recorded since the last check.
    pub fn is_detected(&self) -> bool {
        self.detected.load(Ordering::SeqCst)
    }

    /// Read and clear the flag.
    pub(crate) fn take(&self) -> bool {
        self.detected.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.detected.store(false, Ordering::SeqCst);
    }
}
