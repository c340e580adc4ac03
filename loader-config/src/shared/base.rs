use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field holds a value outside of its accepted range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// Retry attempts cannot be zero, every unit runs at least once.
    #[error("`retry.max_attempts` cannot be zero")]
    RetryMaxAttemptsZero,
    /// The number of tables applied concurrently cannot be zero.
    #[error("`max_parallel_tables` cannot be zero")]
    MaxParallelTablesZero,
}
