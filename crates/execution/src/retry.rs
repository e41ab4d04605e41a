// In crates/execution/src/retry.rs

use crate::{Error, Result};
use app_config::ExecutionSettings;
use std::future::Future;
use std::time::Duration;

/// Bounded retry with exponential backoff and a per-attempt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included. At least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each further failure.
    pub base_delay: Duration,
    /// Upper bound on a single attempt.
    pub timeout: Duration,
    /// Whether a timed-out attempt may be retried. Off for order placement,
    /// where the first attempt may have filled.
    pub retry_timeouts: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            timeout,
            retry_timeouts: true,
        }
    }

    pub fn from_settings(settings: &ExecutionSettings) -> Self {
        Self::new(
            settings.max_attempts,
            Duration::from_millis(settings.backoff_base_ms),
            Duration::from_secs(settings.timeout_secs),
        )
    }

    /// The same policy, but a timeout surfaces immediately.
    pub fn no_retry_on_timeout(self) -> Self {
        Self { retry_timeouts: false, ..self }
    }

    /// Backoff before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

/// Runs `call` until it succeeds, fails permanently, or the policy's
/// attempts are exhausted. Each attempt is bounded by `policy.timeout`.
///
/// # Arguments
///
/// * `policy`: Attempt count, backoff and timeout.
/// * `operation`: Name used in logs and in `Error::Timeout`.
/// * `call`: Produces a fresh future per attempt.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        let outcome = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: operation.to_string(),
                after_ms: policy.timeout.as_millis() as u64,
            }),
        };

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let timed_out = matches!(error, Error::Timeout { .. });
        let retryable = error.is_transient() && (policy.retry_timeouts || !timed_out);
        if !retryable || attempt >= policy.max_attempts {
            tracing::warn!(operation, attempt, error = %error, "Giving up.");
            return Err(error);
        }

        let delay = policy.delay_for(attempt);
        tracing::warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient failure, retrying."
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1))
    }

    #[test]
    fn backoff_doubles() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = tokio::time::Instant::now();

        let result = with_retry(policy(), "balance", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::DataUnavailable("busy".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff.
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = with_retry(policy(), "order", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::ExecutionFailed { reason: "rejected".into() }) }
        })
        .await;

        assert!(matches!(result, Err(Error::ExecutionFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = with_retry(policy(), "balance", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::DataUnavailable("down".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::DataUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out_and_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = with_retry(policy(), "balance", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Timeout { after_ms: 1000, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn order_timeouts_surface_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = with_retry(policy().no_retry_on_timeout(), "place_order", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
