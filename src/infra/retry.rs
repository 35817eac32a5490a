//! Retry with exponential backoff and jitter
//!
//! Used when publishing a minted certificate to the ledger: a transient
//! ledger failure is retried a few times before the certificate is parked
//! as pending.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;

/// Retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = single attempt)
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
    /// Jitter factor in 0.0..=1.0
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }
}

impl RetryConfig {
    /// Ledger writes: short and bounded, the caller holds a batch lock
    pub fn ledger() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.3,
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter <= 0.0 {
            return Duration::from_secs_f64(capped);
        }

        let range = capped * self.jitter;
        let offset = rand::thread_rng().gen_range(-range..=range);
        Duration::from_secs_f64((capped + offset).max(0.0))
    }
}

/// Outcome of a retried operation
#[derive(Debug)]
pub struct RetryResult<T, E> {
    pub result: Result<T, E>,
    /// Attempts made (1 = first try)
    pub attempts: u32,
    pub total_duration: Duration,
}

impl<T, E> RetryResult<T, E> {
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Retry executor
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation` until it succeeds, `should_retry` rejects the error,
    /// or the retry budget is spent.
    pub async fn run_with_predicate<F, Fut, T, E, P>(
        &self,
        context: &str,
        operation: F,
        should_retry: P,
    ) -> RetryResult<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let start = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;

            match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::info!(
                            context,
                            attempts,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Operation succeeded after retries"
                        );
                    }
                    return RetryResult {
                        result: Ok(value),
                        attempts,
                        total_duration: start.elapsed(),
                    };
                }
                Err(e) => {
                    if attempts > self.config.max_retries || !should_retry(&e) {
                        tracing::warn!(
                            context,
                            attempts,
                            error = %e,
                            "Operation failed, giving up"
                        );
                        return RetryResult {
                            result: Err(e),
                            attempts,
                            total_duration: start.elapsed(),
                        };
                    }

                    let delay = self.config.delay_for_attempt(attempts - 1);
                    tracing::debug!(
                        context,
                        attempt = attempts,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Operation failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
