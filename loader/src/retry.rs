//! Bounded retries with a fixed backoff.

use std::future::Future;
use std::time::Duration;

use loader_config::shared::RetryConfig;
use metrics::counter;
use tokio::time::Instant;
use tracing::warn;

use crate::error::LoaderResult;
use crate::metrics::LOADER_RETRIES_TOTAL;
use crate::policy::{RetryDirective, build_error_handling_policy};

/// How often and how long a unit of work is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
    deadline: Option<Instant>,
}

impl RetryPolicy {
    /// Creates a policy running a unit at most `max_attempts` times, at least once.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            deadline: None,
        }
    }

    /// Stops retrying once the next backoff would end after `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy::new(config.max_attempts, Duration::from_millis(config.backoff_ms))
    }
}

/// Runs `operation` until it succeeds or `policy` is exhausted.
///
/// The first attempt starts immediately and every later one after a fixed backoff. After the
/// last attempt the error of that attempt is returned. Errors classified as
/// [`RetryDirective::NoRetry`] are returned without further attempts.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    unit: &'static str,
    mut operation: F,
) -> LoaderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LoaderResult<T>>,
{
    let mut attempt = 1;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if build_error_handling_policy(&err).retry_directive() == RetryDirective::NoRetry {
            return Err(err);
        }

        if attempt >= policy.max_attempts {
            warn!(unit, attempt, error = %err, "retries exhausted");
            return Err(err);
        }

        if let Some(deadline) = policy.deadline {
            if Instant::now() + policy.backoff > deadline {
                warn!(unit, attempt, error = %err, "retry deadline reached");
                return Err(err);
            }
        }

        warn!(
            unit,
            attempt,
            max_attempts = policy.max_attempts,
            backoff_ms = policy.backoff.as_millis() as u64,
            error = %err,
            "attempt failed, retrying after backoff"
        );
        counter!(LOADER_RETRIES_TOTAL, "unit" => unit).increment(1);

        tokio::time::sleep(policy.backoff).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::ErrorKind;
    use crate::loader_error;

    const BACKOFF: Duration = Duration::from_secs(1);

    fn failing_until(succeed_on: u32, attempts: &AtomicU32) -> LoaderResult<u32> {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt < succeed_on {
            return Err(loader_error!(
                ErrorKind::DestinationQueryFailed,
                "Statement failed",
                format!("attempt {attempt}")
            ));
        }

        Ok(attempt)
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_two_backoffs() {
        let attempts = &AtomicU32::new(0);
        let policy = RetryPolicy::new(3, BACKOFF);

        let start = Instant::now();
        let result = retry_with_backoff(&policy, "table", || async move {
            failing_until(3, attempts)
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= BACKOFF * 2 && elapsed < BACKOFF * 3, "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_runs_without_backoff() {
        let attempts = &AtomicU32::new(0);
        let policy = RetryPolicy::new(3, BACKOFF);

        let start = Instant::now();
        retry_with_backoff(&policy, "table", || async move { failing_until(1, attempts) })
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_last_error_after_exhaustion() {
        let attempts = &AtomicU32::new(0);
        let policy = RetryPolicy::new(2, BACKOFF);

        let err = retry_with_backoff(&policy, "group", || async move {
            failing_until(10, attempts)
        })
        .await
        .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(err.detail(), Some("attempt 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_are_returned_immediately() {
        let attempts = &AtomicU32::new(0);
        let policy = RetryPolicy::new(5, BACKOFF);

        let err = retry_with_backoff(&policy, "table", || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(loader_error!(
                ErrorKind::KeyResolutionFailed,
                "Change record has no usable key"
            ))
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::KeyResolutionFailed);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_retrying() {
        let attempts = &AtomicU32::new(0);
        let policy =
            RetryPolicy::new(10, BACKOFF).with_deadline(Instant::now() + BACKOFF * 2 + BACKOFF / 2);

        retry_with_backoff(&policy, "table", || async move { failing_until(100, attempts) })
            .await
            .unwrap_err();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        assert_eq!(RetryPolicy::new(0, BACKOFF).max_attempts(), 1);
    }

    #[test]
    fn builds_from_config() {
        let policy = RetryPolicy::from(&RetryConfig::default());
        assert_eq!(policy.max_attempts(), RetryConfig::DEFAULT_MAX_ATTEMPTS);
        assert_eq!(
            policy.backoff(),
            Duration::from_millis(RetryConfig::DEFAULT_BACKOFF_MS)
        );
        assert_eq!(policy.deadline(), None);
    }
}
