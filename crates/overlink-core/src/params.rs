//! Session parameters: identity and diagnostics settings of one instance.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{CoreError, CoreResult};

/// Maximum length of an instance name, in characters.
pub const MAX_INSTANCE_NAME_LEN: usize = 64;

/// Suffix of the mapping channel name.
const MAP_SUFFIX: &str = ".map";

/// Suffix of the inverse channel name.
const PROCS_SUFFIX: &str = ".procs";

/// Log verbosity requested for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Informational messages and above.
    Info,
    /// Everything, including debug output.
    Debug,
    /// Warnings and errors.
    Warning,
    /// Errors only.
    #[default]
    Error,
}

impl LogLevel {
    /// Equivalent `tracing` filter directive.
    #[must_use]
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "warn" | "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(CoreError::InvalidParameter {
                field: "log_level",
                message: format!("unknown log level '{other}'"),
            }),
        }
    }
}

/// Kind of crash capture written when a hooked process faults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrashDumpsType {
    /// No crash capture.
    #[default]
    None,
    /// Minimal capture.
    Mini,
    /// Capture including data segments.
    Data,
    /// Full memory capture.
    Full,
}

impl FromStr for CrashDumpsType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "mini" => Ok(Self::Mini),
            "data" => Ok(Self::Data),
            "full" => Ok(Self::Full),
            other => Err(CoreError::InvalidParameter {
                field: "crash_dumps_type",
                message: format!("unknown crash dump type '{other}'"),
            }),
        }
    }
}

/// Identity and configuration of one virtual-filesystem instance.
///
/// Immutable once built; the channel names are derived from the instance
/// name at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParameters {
    instance_name: String,
    current_shm_name: String,
    current_inverse_shm_name: String,
    debug_mode: bool,
    log_level: LogLevel,
    crash_dumps_type: CrashDumpsType,
    crash_dumps_path: PathBuf,
}

impl SessionParameters {
    /// Build parameters for `instance_name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidParameter`] if the name is empty, longer
    /// than [`MAX_INSTANCE_NAME_LEN`] characters, or contains characters
    /// other than ASCII letters, digits, `_`, `-` and `.`.
    pub fn new(
        instance_name: impl Into<String>,
        debug_mode: bool,
        log_level: LogLevel,
        crash_dumps_type: CrashDumpsType,
        crash_dumps_path: impl Into<PathBuf>,
    ) -> CoreResult<Self> {
        let instance_name = instance_name.into();
        validate_instance_name(&instance_name)?;

        // Distinct suffixes keep the two kinds apart; no instance name is
        // shortened, so each name maps to its own pair.
        Ok(Self {
            current_shm_name: format!("{instance_name}{MAP_SUFFIX}"),
            current_inverse_shm_name: format!("{instance_name}{PROCS_SUFFIX}"),
            instance_name,
            debug_mode,
            log_level,
            crash_dumps_type,
            crash_dumps_path: crash_dumps_path.into(),
        })
    }

    /// Parameters with default diagnostics for `instance_name`.
    ///
    /// # Errors
    ///
    /// See [`SessionParameters::new`].
    pub fn named(instance_name: impl Into<String>) -> CoreResult<Self> {
        Self::new(
            instance_name,
            false,
            LogLevel::default(),
            CrashDumpsType::default(),
            PathBuf::new(),
        )
    }

    /// Unique name of this instance.
    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Name of the channel that publishes the mapping table.
    #[must_use]
    pub fn current_shm_name(&self) -> &str {
        &self.current_shm_name
    }

    /// Name of the channel interception layers report into.
    #[must_use]
    pub fn current_inverse_shm_name(&self) -> &str {
        &self.current_inverse_shm_name
    }

    /// Whether debug diagnostics are on.
    #[must_use]
    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    /// Requested log verbosity.
    #[must_use]
    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    /// Crash capture kind.
    #[must_use]
    pub fn crash_dumps_type(&self) -> CrashDumpsType {
        self.crash_dumps_type
    }

    /// Where crash captures are written.
    #[must_use]
    pub fn crash_dumps_path(&self) -> &std::path::Path {
        &self.crash_dumps_path
    }
}

impl fmt::Display for SessionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.instance_name)
    }
}

fn validate_instance_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::InvalidParameter {
            field: "instance_name",
            message: "must not be empty".to_owned(),
        });
    }

    if name.chars().count() > MAX_INSTANCE_NAME_LEN {
        return Err(CoreError::InvalidParameter {
            field: "instance_name",
            message: format!("must not exceed {MAX_INSTANCE_NAME_LEN} characters"),
        });
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(CoreError::InvalidParameter {
            field: "instance_name",
            message: format!("invalid character '{bad}'"),
        });
    }

    if name.starts_with('.') {
        return Err(CoreError::InvalidParameter {
            field: "instance_name",
            message: "must not start with '.'".to_owned(),
        });
    }

    Ok(())
}
