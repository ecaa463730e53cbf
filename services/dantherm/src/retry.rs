//! Retry with exponential backoff for register reads

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Backoff policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.initial_delay
            .mul_f64(self.multiplier.powi(attempt as i32))
    }

    /// Run `op` until it yields a value or attempts run out
    ///
    /// Every failed attempt is followed by its backoff delay, so three
    /// failures wait 0.5 s, 1 s and 2 s before giving up.
    pub async fn retry<T, F, Fut>(&self, mut op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        for attempt in 0..self.max_attempts {
            if let Some(value) = op().await {
                return Some(value);
            }
            let delay = self.delay_for(attempt);
            debug!(
                "Attempt {}/{} returned no value, retrying in {:?}",
                attempt + 1,
                self.max_attempts,
                delay
            );
            tokio::time::sleep(delay).await;
        }
        None
    }
}
