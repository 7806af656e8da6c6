//! Recurring background tasks with graceful shutdown.
//!
//! A [`RecurringTask`] runs an async closure on a fixed interval until the
//! shared shutdown broadcast fires. Runs never overlap: the next tick is
//! scheduled only after the previous run finished, and missed ticks are
//! skipped rather than burst.

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

/// A named task executed on a fixed interval.
pub struct RecurringTask<F> {
    name: String,
    period: Duration,
    run_immediately: bool,
    shutdown: broadcast::Receiver<()>,
    job: F,
}

impl<F, Fut> RecurringTask<F>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    /// Create a task that first runs one full `period` after spawn.
    ///
    /// # Arguments
    ///
    /// * `name` - Task name for logging (e.g., "waitlist-promotion")
    /// * `period` - Time between the starts of consecutive runs
    /// * `shutdown` - Broadcast receiver for graceful shutdown
    /// * `job` - Closure producing one run's future
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        period: Duration,
        shutdown: broadcast::Receiver<()>,
        job: F,
    ) -> Self {
        Self {
            name: name.into(),
            period,
            run_immediately: false,
            shutdown,
            job,
        }
    }

    /// Run once right after spawn instead of waiting a full period.
    #[must_use]
    pub const fn run_immediately(mut self) -> Self {
        self.run_immediately = true;
        self
    }

    /// Spawn the loop as a background task.
    ///
    /// The returned handle completes once shutdown is observed. A run that is
    /// in progress when shutdown fires is allowed to finish.
    #[must_use]
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(task = %self.name, period_secs = self.period.as_secs(), "Recurring task started");

        let mut ticker = interval(self.period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if !self.run_immediately {
            // First tick of a tokio interval completes immediately.
            ticker.tick().await;
        }

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(task = %self.name, "Recurring task received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    debug!(task = %self.name, "Recurring task tick");
                    (self.job)().await;
                }
            }
        }

        info!(task = %self.name, "Recurring task stopped");
    }
}
