//! Cancellable timers backed by tokio tasks.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Opaque handle to a scheduled one-shot or repeating timer.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Run `fut` once after `delay`. A zero delay fires on the next poll.
    pub fn once<F>(delay: Duration, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        });
        Self { task }
    }

    /// Call `tick` every `period`, first after one full period. A tick that
    /// overruns the period delays the next one instead of bursting.
    pub fn repeating<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        Self { task }
    }

    /// Stop the timer. Cancelling a timer that already fired is a no-op.
    pub fn cancel(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Holds at most one live timer plus a generation counter.
///
/// Every arm or cancel bumps the generation. A timer callback captures the
/// generation it was armed with and checks [`TimerSlot::is_current`] before
/// acting, which turns a fire that raced a cancel into a no-op.
#[derive(Debug, Default)]
pub(crate) struct TimerSlot {
    handle: Option<TimerHandle>,
    generation: u64,
}

impl TimerSlot {
    /// Cancel whatever is armed and arm a new timer built by `make`.
    pub fn arm(&mut self, make: impl FnOnce(u64) -> TimerHandle) {
        self.cancel();
        self.handle = Some(make(self.generation));
    }

    /// Replace the armed timer without aborting it. Used by a timer that
    /// reschedules itself from inside its own task.
    pub fn rearm_detached(&mut self, make: impl FnOnce(u64) -> TimerHandle) {
        self.handle.take();
        self.generation += 1;
        self.handle = Some(make(self.generation));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel();
        }
        self.generation += 1;
    }

    /// Mark a fired timer as done, if it is still the armed one.
    pub fn release(&mut self, generation: u64) -> bool {
        if self.is_current(generation) {
            self.handle.take();
            true
        } else {
            false
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
