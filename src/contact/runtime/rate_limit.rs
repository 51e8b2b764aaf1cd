use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Serializes identity-class calls and spaces them at least `interval` apart.
///
/// A caller arriving inside the interval waits for it to elapse; nothing is
/// rejected. The lock is held for the whole call, so two identity calls never
/// overlap either.
#[derive(Debug)]
pub struct IdentityRateLimiter {
    interval: Duration,
    last_run: Mutex<Option<Instant>>,
}

impl IdentityRateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: Mutex::new(None),
        }
    }

    pub async fn run<F, T>(&self, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let mut last_run = self.last_run.lock().await;

        if let Some(previous) = *last_run {
            let ready_at = previous + self.interval;
            if Instant::now() < ready_at {
                log::debug!(
                    "[EXECUTOR] identity rate limit, waiting {:?}",
                    ready_at - Instant::now()
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }

        let output = work.await;
        *last_run = Some(Instant::now());
        output
    }
}
