use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::mysql::MySqlConnectOptions;

use crate::shared::ValidationError;

/// Character set negotiated on every destination connection.
const DEFAULT_CHARSET: &str = "utf8mb4";

/// Configuration for connecting to the MySQL-compatible destination database.
///
/// Does not implement `Serialize` so the password cannot leak into serialized output.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MySqlConnectionConfig {
    /// Hostname or IP address of the destination server.
    pub host: String,
    /// Port the destination server listens on.
    pub port: u16,
    /// Name of the database changes are applied to.
    pub name: String,
    /// Username used to authenticate.
    pub username: String,
    /// Password for `username`, redacted in debug output.
    pub password: Option<SecretString>,
    /// Minimum number of pooled connections kept open.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Maximum number of pooled connections; bounds the real parallelism of batch execution.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl MySqlConnectionConfig {
    pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;

    pub const DEFAULT_MAX_CONNECTIONS: u32 = 16;

    /// Validates the pool sizing.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_connections == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "destination.max_connections".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.min_connections > self.max_connections {
            return Err(ValidationError::InvalidFieldValue {
                field: "destination.min_connections".to_string(),
                constraint: "must not exceed `max_connections`".to_string(),
            });
        }

        Ok(())
    }
}

/// Converts a connection configuration into driver specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Options connecting to the server without selecting a database.
    ///
    /// Useful for administrative statements such as `CREATE DATABASE`.
    fn without_db(&self) -> Output;

    /// Options connecting to the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<MySqlConnectOptions> for MySqlConnectionConfig {
    fn without_db(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .charset(DEFAULT_CHARSET);

        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }

        options
    }

    fn with_db(&self) -> MySqlConnectOptions {
        let options: MySqlConnectOptions = self.without_db();
        options.database(&self.name)
    }
}

fn default_min_connections() -> u32 {
    MySqlConnectionConfig::DEFAULT_MIN_CONNECTIONS
}

fn default_max_connections() -> u32 {
    MySqlConnectionConfig::DEFAULT_MAX_CONNECTIONS
}
