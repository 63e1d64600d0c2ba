//! Configuration for the dormant session cache.
//!
//! Provides TOML-based configuration with:
//! - `[cache]` sizing, blocking and timeout settings
//! - `[store]` context store selection (memory, file, sqlite)
//! - `[logging]` console level and rolling JSON log directory
//! - Config file layering (user config + project-local + explicit file)
//!   with per-field precedence

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadOptions, LoadedConfig, load_config, load_config_file,
    load_config_with_options, user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
