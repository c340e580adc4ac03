use crate::error::{ErrorKind, LoaderError};

/// Retry behavior for a classified error.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryDirective {
    /// The unit of work can be retried after the configured backoff.
    Timed,
    /// Retrying the same input cannot succeed.
    NoRetry,
}

/// Policy describing how a [`LoaderError`] should be handled by the retry loop.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    retry_directive: RetryDirective,
    solution: Option<&'static str>,
}

impl ErrorHandlingPolicy {
    const fn new(retry_directive: RetryDirective, solution: Option<&'static str>) -> Self {
        Self {
            retry_directive,
            solution,
        }
    }

    pub fn retry_directive(&self) -> RetryDirective {
        self.retry_directive
    }

    /// Returns an optional operator-facing solution message.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }
}

/// Builds the [`ErrorHandlingPolicy`] of an error.
///
/// Aggregated errors are not retried if any of their errors must not be retried.
pub fn build_error_handling_policy(error: &LoaderError) -> ErrorHandlingPolicy {
    error
        .kinds()
        .into_iter()
        .map(policy_for_kind)
        .find(|policy| policy.retry_directive == RetryDirective::NoRetry)
        .unwrap_or_else(|| policy_for_kind(error.kind()))
}

fn policy_for_kind(kind: ErrorKind) -> ErrorHandlingPolicy {
    match kind {
        ErrorKind::KeyResolutionFailed => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Ensure the table has a primary key or a unique key whose values are never NULL."),
        ),
        ErrorKind::InvalidData | ErrorKind::ConversionError => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Inspect the change records emitted upstream for this table."),
        ),
        ErrorKind::ConfigError => ErrorHandlingPolicy::new(
            RetryDirective::NoRetry,
            Some("Fix the loader configuration and restart."),
        ),
        ErrorKind::DestinationTableMissing => ErrorHandlingPolicy::new(
            RetryDirective::Timed,
            Some("Create the table on the destination or replay its DDL first."),
        ),
        ErrorKind::DestinationConstraintViolation => ErrorHandlingPolicy::new(
            RetryDirective::Timed,
            Some("Enable safe mode if duplicate entries persist across retries."),
        ),
        _ => ErrorHandlingPolicy::new(RetryDirective::Timed, None),
    }
}
