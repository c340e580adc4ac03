use loader_config::load_config;
use loader_config::shared::ReplayerConfig;

use crate::error::{ReplayerError, ReplayerResult};

/// Loads the replayer configuration from the `configuration` directory and validates it.
pub fn load_replayer_config() -> ReplayerResult<ReplayerConfig> {
    let config = load_config::<ReplayerConfig>().map_err(ReplayerError::config)?;
    config.validate().map_err(ReplayerError::config)?;

    Ok(config)
}
