//! Engine error types.

use overlink_config::ConfigError;
use overlink_core::CoreError;
use overlink_inject::InjectError;
use overlink_session::SessionError;
use overlink_telemetry::TelemetryError;
use thiserror::Error;

/// Errors returned by the engine surface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The operation needs a session and none is attached.
    #[error("no session attached (create or connect one first)")]
    NoSession,

    /// A session is already attached to this engine.
    #[error("already attached to instance {instance}")]
    AlreadyAttached {
        /// Instance the engine is attached to.
        instance: String,
    },

    /// Rule, parameter or manifest error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Session lifecycle error.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Launch error.
    #[error(transparent)]
    Inject(#[from] InjectError),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Logging setup error.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
