//! Session error types.

use std::path::PathBuf;

use overlink_core::CoreError;
use thiserror::Error;

use crate::SessionStatus;

/// Errors raised by session lifecycle and channel operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A live session with this instance name already exists.
    #[error("instance '{instance}' already exists")]
    AlreadyExists {
        /// Instance name.
        instance: String,
    },

    /// No live session with this instance name exists.
    #[error("instance '{instance}' not found")]
    NotFound {
        /// Instance name.
        instance: String,
    },

    /// The operation is not valid in the handle's current state.
    #[error("cannot {operation} while {status}")]
    InvalidState {
        /// Current lifecycle state.
        status: SessionStatus,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// The session lock could not be acquired in time.
    #[error("timed out waiting for session lock {}", path.display())]
    LockTimeout {
        /// Lock file path.
        path: PathBuf,
    },

    /// A channel file holds data that does not parse.
    #[error("corrupt channel file {}: {message}", path.display())]
    Corrupt {
        /// File that failed to parse.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// Filesystem error on a channel file.
    #[error("IO error at {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A required environment variable is missing.
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    /// The change watcher could not be started.
    #[error("change watcher: {0}")]
    Watch(String),

    /// Error from the mapping table.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

pub(crate) fn io_err(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> SessionError {
    let path = path.into();
    move |source| SessionError::Io { path, source }
}
