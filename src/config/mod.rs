mod schema;

pub use schema::*;

use std::path::Path;
use thiserror::Error;

/// Used when neither `-c` nor `PGROUTE66CONFIG` names a file
pub const DEFAULT_CONFIG_FILE: &str = "/etc/pgroute66/config.toml";

/// Environment variable holding the config file path
pub const CONFIG_ENV: &str = "PGROUTE66CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Load the config file at `path`.
///
/// When `debug` is set the log level is forced to `debug`, otherwise the
/// configured level is lower-cased.
pub fn load_config<P: AsRef<Path>>(path: P, debug: bool) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config: Config = toml::from_str(&content)?;
    if debug {
        config.loglevel = DEBUG_LOGLEVEL.to_string();
    } else {
        config.loglevel = config.loglevel.to_lowercase();
    }
    Ok(config)
}
