//! Remote services configuration errors

use std::path::PathBuf;

use thiserror::Error;

/// Errors loading a remote services configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parse but are not usable
    #[error("Invalid config value: {0}")]
    Invalid(String),
}
