//! Bounded exponential retry around a single provider call

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::types::ProviderError;

/// Retry budget for one provider call.
///
/// Delays double after every failed attempt with no jitter:
/// 1s, 2s, 4s with the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = `max_retries + 1`)
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Overall wall-clock budget; `None` means no deadline
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_elapsed: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_elapsed: None,
        }
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Option<Duration>) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Worst-case time spent sleeping: `initial * (2^max_retries - 1)`
    pub fn total_backoff(&self) -> Duration {
        (0..self.max_retries).fold(Duration::ZERO, |acc, n| {
            acc.saturating_add(self.delay_for(n))
        })
    }

    fn delay_for(&self, retry_index: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(retry_index))
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out.
    /// The final error is returned unchanged unless the deadline cut it short.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let started = Instant::now();
        let mut retry_index = 0u32;

        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_transient() {
                debug!("{}: permanent failure, not retrying: {}", label, err);
                return Err(err);
            }

            if retry_index >= self.max_retries {
                warn!(
                    "{}: giving up after {} attempts: {}",
                    label,
                    retry_index + 1,
                    err
                );
                return Err(err);
            }

            let delay = self.delay_for(retry_index);
            if let Some(limit) = self.max_elapsed {
                let elapsed = started.elapsed();
                if elapsed.saturating_add(delay) > limit {
                    warn!(
                        "{}: next backoff of {:?} would exceed the {:?} deadline",
                        label, delay, limit
                    );
                    return Err(ProviderError::DeadlineExceeded {
                        elapsed,
                        last: Box::new(err),
                    });
                }
            }

            debug!(
                "{}: attempt {} failed (rate_limited={}), backing off for {:?}: {}",
                label,
                retry_index + 1,
                err.is_rate_limited(),
                delay,
                err
            );
            tokio::time::sleep(delay).await;
            retry_index += 1;
        }
    }
}
