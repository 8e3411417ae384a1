//! Injection error types.

use std::fmt;
use std::time::Duration;

use overlink_core::CoreError;
use overlink_session::SessionError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Step of a launch at which it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchStage {
    /// Splitting the command line.
    Parse,
    /// Locating the executable.
    Resolve,
    /// Reading the executable's word size.
    Inspect,
    /// Creating the process.
    Spawn,
    /// Attaching the interception module.
    Inject,
    /// Talking to the word-size proxy.
    Proxy,
    /// Adding the pid to the session.
    Register,
}

impl fmt::Display for LaunchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parse => "parse",
            Self::Resolve => "resolve",
            Self::Inspect => "inspect",
            Self::Spawn => "spawn",
            Self::Inject => "inject",
            Self::Proxy => "proxy",
            Self::Register => "register",
        };
        f.write_str(name)
    }
}

/// Errors raised while launching a process into a session.
#[derive(Debug, Error)]
pub enum InjectError {
    /// The executable is excluded from injection. No process was created.
    #[error("executable '{executable}' is blacklisted")]
    Blacklisted {
        /// Basename that matched the blacklist.
        executable: String,
    },

    /// The launch failed at `stage`. Any half-created process was killed.
    #[error("process launch failed at {stage}: {message}")]
    Launch {
        /// Failing step.
        stage: LaunchStage,
        /// What went wrong.
        message: String,
    },

    /// The proxy did not answer in time.
    #[error("proxy did not respond within {timeout:?}")]
    ProxyTimeout {
        /// Configured acknowledgement window.
        timeout: Duration,
    },

    /// Session error while registering the process.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Error from the execution policy.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl InjectError {
    /// A [`InjectError::Launch`] at `stage`.
    #[must_use]
    pub fn launch(stage: LaunchStage, message: impl fmt::Display) -> Self {
        Self::Launch {
            stage,
            message: message.to_string(),
        }
    }

    /// The launch stage this error belongs to, if it has one.
    #[must_use]
    pub fn stage(&self) -> Option<LaunchStage> {
        match self {
            Self::Launch { stage, .. } => Some(*stage),
            Self::ProxyTimeout { .. } => Some(LaunchStage::Proxy),
            Self::Session(_) => Some(LaunchStage::Register),
            Self::Blacklisted { .. } | Self::Core(_) => None,
        }
    }
}

/// Result type for injection operations.
pub type InjectResult<T> = Result<T, InjectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_error_display() {
        let err = InjectError::launch(LaunchStage::Spawn, "no such file");
        assert_eq!(err.to_string(), "process launch failed at spawn: no such file");
        assert_eq!(err.stage(), Some(LaunchStage::Spawn));
    }

    #[test]
    fn test_stage_wire_names() {
        let json = serde_json::to_string(&LaunchStage::Register).unwrap();
        assert_eq!(json, "\"register\"");
    }
}
