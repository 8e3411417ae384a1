use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building link rules, mapping tables and policies.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A rule, library or parameter path was not absolute.
    #[error("path must be absolute: {}", path.display())]
    RelativePath {
        /// The offending path.
        path: PathBuf,
    },

    /// The rule is malformed (e.g. a file rule with the recursive flag).
    #[error("invalid link rule: {0}")]
    InvalidRule(String),

    /// Raw flag value carries bits that do not name a link flag.
    #[error("unknown link flag bits: {0:#x}")]
    UnknownFlags(u32),

    /// `FAIL_IF_EXISTS` was set and the target already exists on disk.
    #[error("link target already exists: {}", target.display())]
    RuleConflict {
        /// The virtual target that collided with a real path.
        target: PathBuf,
    },

    /// A session parameter is out of range.
    #[error("invalid parameter {field}: {message}")]
    InvalidParameter {
        /// Parameter name.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Filesystem error while inspecting or expanding a rule.
    #[error("IO error at {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A mapping manifest could not be parsed.
    #[error("failed to parse mapping manifest: {0}")]
    Manifest(String),
}

/// Convenience result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
