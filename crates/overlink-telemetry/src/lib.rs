//! Overlink Telemetry - logging setup for the overlink engine, CLI and proxy.
//!
//! # Example
//!
//! ```rust,no_run
//! use overlink_telemetry::{LogConfig, LogFormat, init_once};
//!
//! # fn main() -> Result<(), overlink_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("overlink_session=trace");
//!
//! init_once(&config)?;
//! tracing::info!("logging ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    DEFAULT_FILE_PREFIX, FileRotation, LogConfig, LogFormat, LogTarget, LoggingInit, init_once,
    setup_logging,
};
