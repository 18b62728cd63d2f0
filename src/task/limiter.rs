//! Shared rate limiter for tasks that call a globally limited service.
//!
//! One limiter is created per run. The executor holds one of its slots around
//! every attempt of a task flagged `rate_limited`. It is the only mutable
//! state shared across submissions.

use crate::error::TaskError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

/// Caps concurrent use and enforces a minimum spacing between acquisitions.
#[derive(Debug)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    min_interval: Duration,
    last_acquired: Mutex<Option<Instant>>,
}

/// Held while the limited resource is in use.
#[derive(Debug)]
pub struct RateLimitPermit {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            min_interval,
            last_acquired: Mutex::new(None),
        }
    }

    /// A limiter that never waits.
    pub fn unlimited() -> Self {
        Self::new(Semaphore::MAX_PERMITS, Duration::ZERO)
    }

    /// Wait for a slot, then for the minimum interval since the previous grant.
    pub async fn acquire(&self) -> Result<RateLimitPermit, TaskError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TaskError::msg("rate limiter closed"))?;

        let mut last = self.last_acquired.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "rate limiter delaying");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());

        Ok(RateLimitPermit { _permit: permit })
    }

    /// Number of slots currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
