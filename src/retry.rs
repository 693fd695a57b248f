//! Retry with exponential backoff and random jitter.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure; doubles after each subsequent one.
    pub base_interval: Duration,
    /// Upper bound (exclusive) of the uniform jitter added to every delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_interval: Duration::from_millis(100),
            max_jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following the (0-indexed) `attempt`,
    /// without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_interval
            .saturating_mul(2u32.saturating_pow(attempt.min(31)))
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let micros = self.max_jitter.as_micros() as u64;
        Duration::from_micros(rand::thread_rng().gen_range(0..micros))
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` is reached.
///
/// The error of the final attempt is returned unchanged. Every failure is
/// logged before the following sleep.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(operation = label, attempt = attempt + 1, "Retry succeeded");
                }
                return Ok(value);
            }
            Err(e) if attempt + 1 >= max_attempts => {
                tracing::error!(
                    operation = label,
                    attempts = max_attempts,
                    error = %e,
                    "Giving up after final attempt"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.backoff(attempt) + policy.jitter();
                tracing::warn!(
                    operation = label,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_op(
        fail_times: u32,
        calls: Arc<AtomicU32>,
    ) -> impl FnMut() -> std::future::Ready<Result<u32, String>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < fail_times {
                std::future::ready(Err(format!("failure {n}")))
            } else {
                std::future::ready(Ok(n))
            }
        }
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = RetryPolicy::default();
        for _ in 0..1000 {
            assert!(policy.jitter() < Duration::from_millis(100));
        }
        let none = RetryPolicy {
            max_jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(none.jitter(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_k_failures_with_minimum_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let start = tokio::time::Instant::now();

        let value = retry(&policy, "test", counting_op(3, calls.clone()))
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 100 + 200 + 400 ms, jitter only adds
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(700), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(700 + 3 * 100));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_with_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_attempts: 5,
            ..RetryPolicy::default()
        };

        let err = retry(&policy, "test", counting_op(u32::MAX, calls.clone()))
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(err, "failure 4");
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_does_not_sleep() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();
        let value = retry(&RetryPolicy::default(), "test", counting_op(0, calls))
            .await
            .unwrap();
        assert_eq!(value, 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        let _ = retry(&policy, "test", counting_op(u32::MAX, calls.clone())).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
