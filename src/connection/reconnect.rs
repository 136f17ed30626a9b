//! Reconnect scheduling
//!
//! A fixed two-interval schedule (short initial delay, then a constant
//! period) driven by a cancellable periodic task. The task never interrupts
//! a tick in progress; cancellation is observed between ticks.

use crate::config::ReconnectSection;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// When reconnect attempts fire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectSchedule {
    pub initial_delay: Duration,
    pub period: Duration,
}

impl Default for ReconnectSchedule {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            period: Duration::from_secs(30),
        }
    }
}

impl From<&ReconnectSection> for ReconnectSchedule {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            initial_delay: section.initial_delay(),
            period: section.period(),
        }
    }
}

/// What a tick tells the periodic task to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Stop,
}

/// Handle to a running periodic task
#[derive(Debug)]
pub struct PeriodicTask {
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Run `tick` after `schedule.initial_delay`, then every `schedule.period`,
    /// until it returns [`TickControl::Stop`] or the task is cancelled.
    pub fn spawn<F, Fut>(schedule: ReconnectSchedule, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TickControl> + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let start = Instant::now() + schedule.initial_delay;
            let mut ticker = interval_at(start, schedule.period);
            // A slow connect attempt must not cause a burst of catch-up fires
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            debug!("Reconnect timer cancelled");
                            return;
                        }
                    }

                    _ = ticker.tick() => {
                        if tick().await == TickControl::Stop {
                            debug!("Reconnect timer stopped");
                            return;
                        }
                    }
                }
            }
        });

        Self { cancel_tx, handle }
    }

    /// Stop the task. Safe to call any number of times from any context.
    pub fn cancel(&self) {
        self.cancel_tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        });
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// True once the task has returned or was cancelled
    pub fn is_finished(&self) -> bool {
        self.is_cancelled() || self.handle.is_finished()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
