use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

use crate::metrics::{METRICS, RuntimeMetrics};

/// Sliding-window rate limiter: at most `max_requests` permits in
/// any `window`.
///
/// Callers never fail, they queue. The grant log sits behind a
/// tokio `Mutex`, which hands out the lock in request order, and a
/// waiting caller keeps the lock while it sleeps, so permits are
/// granted strictly FIFO. Dropping a waiting `acquire` future
/// leaves the queue without consuming a permit.
pub struct SlidingWindowLimiter {
    window: Duration,
    max_requests: usize,
    granted: Mutex<VecDeque<Instant>>,
    permits_granted: AtomicUsize,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            window,
            max_requests,
            granted: Mutex::new(VecDeque::with_capacity(max_requests)),
            permits_granted: AtomicUsize::new(0),
        }
    }

    /// Waits until a permit is available and takes it.
    pub async fn acquire(&self) {
        let mut granted = self.granted.lock().await;

        loop {
            let now = Instant::now();
            while granted.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
                granted.pop_front();
            }

            if granted.len() < self.max_requests {
                granted.push_back(now);
                break;
            }

            let Some(oldest) = granted.front().copied() else {
                continue;
            };
            let ready_at = oldest + self.window;

            RuntimeMetrics::incr(&METRICS.rate_limit_waits);
            log::debug!(
                "metadata rate limit reached ({} per {:?}), waiting {:?}",
                self.max_requests,
                self.window,
                ready_at - now
            );
            sleep_until(ready_at).await;
        }

        self.permits_granted.fetch_add(1, Ordering::Relaxed);
    }

    /// Permits handed out since creation.
    pub fn permits_granted(&self) -> usize {
        self.permits_granted.load(Ordering::Relaxed)
    }
}
