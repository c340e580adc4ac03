use serde::Deserialize;

use crate::Config;
use crate::shared::{LoaderConfig, ValidationError};

/// Complete configuration of the replayer binary.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReplayerConfig {
    /// Apply layer configuration.
    pub loader: LoaderConfig,
    /// Port of the Prometheus scrape endpoint. Metrics are not exported when unset.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl ReplayerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.loader.validate()
    }
}

impl Config for ReplayerConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
