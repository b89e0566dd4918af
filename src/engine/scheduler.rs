//! Periodic background tasks.
//!
//! Each task is a spawned tokio loop driven by `tokio::time::interval`.
//! Every handler invocation runs in its own child task, so a panicking
//! handler is logged and the timer keeps going. Overrunning ticks are
//! skipped rather than bunched up.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Handle to a running periodic task.
pub struct PeriodicTask {
    name: &'static str,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the task to stop and wait for the loop to exit. An in-flight
    /// handler invocation is allowed to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            error!(task = self.name, error = %e, "Periodic task ended abnormally");
        }
        debug!(task = self.name, "Periodic task stopped");
    }
}

/// Run `handler` every `period`, first after `initial_delay`.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    initial_delay: Duration,
    period: Duration,
    handler: F,
) -> PeriodicTask
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (stop, mut stopped) = watch::channel(false);

    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(initial_delay) => {}
            _ = stopped.changed() => return,
        }

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(task = name, period_ms = period.as_millis() as u64, "Periodic task started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Child task isolates panics from the timer loop
                    if let Err(e) = tokio::spawn(handler()).await {
                        if e.is_panic() {
                            error!(task = name, "Periodic handler panicked");
                        }
                    }
                }
                _ = stopped.changed() => break,
            }
        }
    });

    PeriodicTask { name, stop, handle }
}
