//! Periodic background tasks sharing one cancellation token.

use super::CancellationToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Owns a group of periodic tasks.
///
/// Every task watches the same token, so one [`shutdown`](Self::shutdown)
/// stops them all. Dropping the scheduler also cancels the token; the tasks
/// then exit at their next wakeup.
pub struct Scheduler {
    token: Arc<CancellationToken>,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: Arc::new(CancellationToken::new()),
            handles: Vec::new(),
        }
    }

    /// Runs `task` every `period`, first after one full period.
    ///
    /// Must be called from within a tokio runtime.
    pub fn every<F>(&mut self, name: impl Into<String>, period: Duration, mut task: F)
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let period = period.max(Duration::from_millis(1));
        let token = Arc::clone(&self.token);
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => task(),
                }
            }
            debug!(task = %task_name, "Background task stopped");
        });

        debug!(task = %name, period_ms = period.as_millis() as u64, "Background task started");
        self.handles.push((name, handle));
    }

    /// Number of tasks started.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// Returns true once shutdown has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stops every task and waits for them to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel("scheduler shutdown");
        for (name, handle) in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(task = %name, error = %e, "Background task ended abnormally");
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.token.cancel("scheduler dropped");
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("task_count", &self.task_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_runs_periodically_until_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        let counter = Arc::clone(&count);
        scheduler.every("tick", Duration::from_secs(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(scheduler.task_count(), 1);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        scheduler.shutdown().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_tasks() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let mut scheduler = Scheduler::new();
            let counter = Arc::clone(&count);
            scheduler.every("tick", Duration::from_secs(1), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
