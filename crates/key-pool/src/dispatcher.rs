//! Process-wide request throttle
//!
//! Every upstream call funnels through one `Dispatcher`. The upstream rate
//! limit is per project, not per key, so the throttle is shared by all
//! credentials. Dispatch starts are serialized in arrival order and spaced
//! at least `min_interval` apart; once started, tasks run concurrently and
//! may complete in any order.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Default spacing between dispatches, under a 60 rpm free-tier ceiling.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1300);

pub struct Dispatcher {
    min_interval: Duration,
    /// Start time of the most recent dispatch. tokio's Mutex queues waiters
    /// in FIFO order, which gives the queue its ordering.
    last_dispatch: Mutex<Option<Instant>>,
}

impl Dispatcher {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_dispatch: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for this task's turn, then run it.
    ///
    /// The outcome, `Err` included, goes back to this caller only; the next
    /// queued task proceeds as soon as the throttle interval allows.
    pub async fn schedule<F, Fut, T>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        {
            let mut last = self.last_dispatch.lock().await;
            if let Some(previous) = *last {
                let ready_at = previous + self.min_interval;
                let now = Instant::now();
                if ready_at > now {
                    let wait = ready_at - now;
                    debug!(wait_ms = wait.as_millis() as u64, "throttling dispatch");
                    tokio::time::sleep(wait).await;
                }
            }
            *last = Some(Instant::now());
        }
        task().await
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}
