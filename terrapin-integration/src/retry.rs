use rand::Rng;
use std::{fmt::Debug, future::Future, time::Duration};
use tracing::warn;

/// Retry with exponential backoff and jitter.
///
/// Only errors the caller's predicate marks retryable are retried; terminal
/// errors surface immediately. The delay before attempt `n` (0-based) is
/// `base_delay * 2^n`, scaled by a jitter factor in `[0.5, 1.0]` and capped
/// at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Run `operation` until it succeeds, fails terminally, or the attempt
    /// budget is spent.
    pub async fn retry<Op, Fut, T, E, R>(&self, mut operation: Op, is_retryable: R) -> Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Debug,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if is_retryable(&error) && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        ?error,
                        "retryable error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);

        let jitter = rand::rng().random_range(0.5..=1.0);
        exponential.mul_f64(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient,
        Terminal,
    }

    fn retryable(error: &TestError) -> bool {
        matches!(error, TestError::Transient)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result = policy
            .retry(
                || {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(TestError::Transient)
                        } else {
                            Ok(n)
                        }
                    }
                },
                retryable,
            )
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_not_retried() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: Result<(), _> = policy
            .retry(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Terminal) }
                },
                retryable,
            )
            .await;

        assert_eq!(result, Err(TestError::Terminal));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_budget_exhausted() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: Result<(), _> = policy
            .retry(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Transient) }
                },
                retryable,
            )
            .await;

        assert_eq!(result, Err(TestError::Transient));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
