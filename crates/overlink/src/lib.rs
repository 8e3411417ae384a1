//! Overlink - per-process virtual filesystem overlay.
//!
//! Processes launched through an [`Engine`] see a different file layout
//! than what is on disk: their file-system calls are rewritten according to
//! the session's link rules, without touching disk contents.
//!
//! # Example
//!
//! ```rust,no_run
//! use overlink::{Engine, init_logging, init_parameters};
//! use overlink_config::Config;
//! use overlink_core::{CrashDumpsType, LinkFlags, LogLevel};
//!
//! # fn main() -> Result<(), overlink::EngineError> {
//! init_logging(false)?;
//!
//! let config = Config::default();
//! let params = init_parameters("game", false, LogLevel::Info, CrashDumpsType::None, "")?;
//!
//! let mut engine = Engine::new(&config);
//! engine.create_vfs(&params)?;
//! engine.link_directory("/mods/a", "/game/data", LinkFlags::RECURSIVE)?;
//! let pid = engine.run_process("/game/bin/game --windowed", "/game")?;
//! println!("started {pid}");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

/// Configuration conversion.
pub mod config_bridge;
mod engine;
mod error;

use std::path::PathBuf;

pub use engine::Engine;
pub use error::{EngineError, EngineResult};

pub use overlink_core::{
    Bounded, CrashDumpsType, ExecutionPolicy, LinkFlags, LinkKind, LinkRule, LogLevel,
    MappingManifest, MappingTable, SessionParameters,
};
pub use overlink_inject::{InjectError, Injector, LaunchStage};
pub use overlink_session::{SessionError, SessionStatus};
pub use overlink_telemetry::LoggingInit;

use overlink_config::Config;

/// Set up process-wide logging from the loaded configuration.
///
/// With `to_local_file` logs go to daily-rolling files in the configured
/// log directory, otherwise to stderr. Only the first call has an effect.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, the filter is
/// invalid, or the log directory cannot be created.
pub fn init_logging(to_local_file: bool) -> EngineResult<LoggingInit> {
    let resolved = Config::load(None)?;
    init_logging_with(&resolved.config, to_local_file)
}

/// Like [`init_logging`], with an already loaded configuration.
///
/// # Errors
///
/// See [`init_logging`].
pub fn init_logging_with(config: &Config, to_local_file: bool) -> EngineResult<LoggingInit> {
    let log_config = config_bridge::to_log_config(config, to_local_file);
    Ok(overlink_telemetry::init_once(&log_config)?)
}

/// Build the parameters that identify a session.
///
/// # Errors
///
/// Returns [`CoreError::InvalidParameter`](overlink_core::CoreError::InvalidParameter)
/// if the instance name is empty, too long, or has characters outside
/// `[A-Za-z0-9_.-]`.
pub fn init_parameters(
    instance_name: &str,
    debug_mode: bool,
    log_level: LogLevel,
    crash_dumps_type: CrashDumpsType,
    crash_dumps_path: impl Into<PathBuf>,
) -> EngineResult<SessionParameters> {
    Ok(SessionParameters::new(
        instance_name,
        debug_mode,
        log_level,
        crash_dumps_type,
        crash_dumps_path,
    )?)
}
