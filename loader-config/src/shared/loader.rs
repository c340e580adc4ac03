use serde::Deserialize;

use crate::shared::{BatchConfig, MySqlConnectionConfig, RetryConfig, ValidationError};

/// Configuration of the apply layer.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoaderConfig {
    /// Destination database receiving the changes.
    pub destination: MySqlConnectionConfig,
    /// Batching of merged changes.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Retries applied to each table unit.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Applies changes row by row, rewriting updates as delete plus replace.
    ///
    /// Slower than batched application but tolerant to duplicate-key hazards.
    #[serde(default)]
    pub safe_mode: bool,
    /// Maximum number of tables whose changes are applied concurrently.
    #[serde(default = "default_max_parallel_tables")]
    pub max_parallel_tables: u16,
}

impl LoaderConfig {
    pub const DEFAULT_MAX_PARALLEL_TABLES: u16 = 16;

    /// Validates every nested section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.destination.validate()?;
        self.batch.validate()?;
        self.retry.validate()?;

        if self.max_parallel_tables == 0 {
            return Err(ValidationError::MaxParallelTablesZero);
        }

        Ok(())
    }
}

fn default_max_parallel_tables() -> u16 {
    LoaderConfig::DEFAULT_MAX_PARALLEL_TABLES
}
