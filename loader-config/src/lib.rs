//! Configuration for the change loader.
//!
//! Holds the shared configuration structures used by the loader library and the replayer
//! binary, together with the hierarchical loader that reads them from configuration files and
//! `APP_`-prefixed environment variables.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
