#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Layered configuration for overlink.
//!
//! ```rust,no_run
//! use overlink_config::Config;
//!
//! let resolved = Config::load(None).unwrap();
//! println!("runtime dir: {}", resolved.config.session.runtime_dir().display());
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Environment variables** (`OVERLINK_RUNTIME_DIR`,
//!    `OVERLINK_PROXY_TIMEOUT_SECS`, `OVERLINK_LOG_LEVEL`, `OVERLINK_LOG_DIR`)
//! 2. **Explicit file** passed by the caller
//! 3. **User** (`$OVERLINK_HOME/config.toml` or the platform config dir)
//! 4. **System** (`/etc/overlink/config.toml`)
//! 5. **Embedded defaults** (`defaults.toml` compiled into the binary)

/// Environment variable overrides.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Layered configuration merging with precedence.
pub mod merge;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{LoadSources, ResolvedConfig};
pub use types::*;

impl Config {
    /// Load configuration with the full precedence chain.
    ///
    /// See [`loader::load`] for the full algorithm.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any config file is malformed or the final
    /// configuration fails validation.
    pub fn load(explicit: Option<&std::path::Path>) -> ConfigResult<ResolvedConfig> {
        loader::load(explicit)
    }

    /// Load a single config file on top of the embedded defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed, or if
    /// the result fails validation.
    pub fn load_file(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }
}
