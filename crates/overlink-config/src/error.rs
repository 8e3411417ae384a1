//! Configuration errors.

use std::io;
use thiserror::Error;

/// Errors from loading, merging or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file exists but could not be read.
    #[error("cannot read {path}: {source}")]
    ReadError {
        /// Offending file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A config file is not valid TOML for [`Config`](crate::Config).
    #[error("invalid config in {path}: {source}")]
    ParseError {
        /// Offending file, or a placeholder such as `<merged config>`.
        path: String,
        /// Parser error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range or inconsistent.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path, e.g. `session.process_list_capacity`.
        field: String,
        /// Why the value was rejected.
        message: String,
    },

    /// An `OVERLINK_*` override could not be applied.
    #[error("${var_name}: {message}")]
    EnvError {
        /// Variable name.
        var_name: String,
        /// What was wrong with it.
        message: String,
    },

    /// Neither `$OVERLINK_HOME` nor a platform config directory is available.
    #[error("no user configuration directory")]
    NoConfigDir,
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
