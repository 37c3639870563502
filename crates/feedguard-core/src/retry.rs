//! Bounded retry with exponential backoff for transient failures.
//!
//! Retry policy lives here, in one place, instead of inside each provider:
//! callers classify failures as transient or permanent and this helper
//! decides whether another attempt is warranted.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Failure classification reported by a retryable operation.
pub trait Retryable {
    /// Whether another attempt could plausibly succeed.
    fn is_transient(&self) -> bool;
}

/// Attempt budget and backoff shape for one operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplicative factor applied after each failed attempt.
    pub backoff_factor: u32,
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            ..Self::default()
        }
    }

    /// Delay before the given retry (1-based: the delay after attempt N).
    fn delay_before_retry(&self, failed_attempts: u32) -> Duration {
        let factor = self.backoff_factor.saturating_pow(failed_attempts.saturating_sub(1));
        self.initial_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the attempt budget is
/// exhausted. Only transient failures are retried; the last error is
/// returned once the budget runs out.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    unit: &str,
    mut op: F,
) -> std::result::Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < policy.attempts => {
                let delay = policy.delay_before_retry(attempt);
                warn!(
                    unit,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        transient: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (transient={})", self.transient)
        }
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_delay: Duration::from_millis(0),
            backoff_factor: 2,
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> =
            retry_with_backoff(fast_policy(3), "test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(TestError { transient: true })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> =
            retry_with_backoff(fast_policy(5), "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError { transient: false }) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> =
            retry_with_backoff(fast_policy(3), "test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError { transient: true }) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy {
            attempts: 4,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2,
        };
        assert_eq!(policy.delay_before_retry(1), Duration::from_secs(1));
        assert_eq!(policy.delay_before_retry(2), Duration::from_secs(2));
        assert_eq!(policy.delay_before_retry(3), Duration::from_secs(4));
    }
}
