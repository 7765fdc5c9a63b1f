//! Retry policy for a single provider visit.
//!
//! Every attempt runs under the provider's timeout; a timed-out attempt is a
//! failure like any other. Retries never cross providers: the orchestrator
//! moves on once the policy gives up.

use crate::provider::ProviderError;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Delay strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed,
    /// `delay * 2^n`, capped at `max_delay`.
    Exponential { max_delay: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
    backoff: Backoff,
}

/// Terminal result of a visit plus the number of attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ProviderError>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { max_delay } => {
                let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor).min(max_delay)
            }
        }
    }

    /// Run `op` until it succeeds or `1 + max_retries` attempts have failed.
    /// `op` receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, timeout: Duration, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let result = match tokio::time::timeout(timeout, op(attempt)).await {
                Ok(r) => r,
                Err(_) => Err(ProviderError::Timeout { after: timeout }),
            };
            attempt += 1;

            match result {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(e) if attempt > self.max_retries => {
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                    }
                }
                Err(e) => {
                    let delay = self.delay_for(attempt - 1);
                    debug!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "provider attempt failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}
