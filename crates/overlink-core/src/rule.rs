//! Link rules: one virtual-path → real-path redirection each.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::path::normalize;
use crate::{CoreError, CoreResult, LinkFlags};

/// Whether a rule links a single file or a directory subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// A single file.
    File,
    /// A directory (and, with [`LinkFlags::RECURSIVE`], its descendants).
    Directory,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => f.write_str("file"),
            Self::Directory => f.write_str("directory"),
        }
    }
}

/// A single redirection entry.
///
/// `source` is the real path on disk; `target` is the virtual path that
/// intercepted processes see. Rules are immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRule {
    source: PathBuf,
    target: PathBuf,
    kind: LinkKind,
    flags: LinkFlags,
}

impl LinkRule {
    /// Build a validated rule.
    ///
    /// Both paths are normalized lexically.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RelativePath`] if either path is relative, or
    /// [`CoreError::InvalidRule`] if a file rule carries
    /// [`LinkFlags::RECURSIVE`] or a path escapes its root.
    pub fn new(
        source: impl AsRef<Path>,
        target: impl AsRef<Path>,
        kind: LinkKind,
        flags: LinkFlags,
    ) -> CoreResult<Self> {
        if kind == LinkKind::File && flags.contains(LinkFlags::RECURSIVE) {
            return Err(CoreError::InvalidRule(
                "file rules cannot be recursive".to_owned(),
            ));
        }

        Ok(Self {
            source: normalize(source.as_ref())?,
            target: normalize(target.as_ref())?,
            kind,
            flags,
        })
    }

    /// Build a file rule.
    ///
    /// # Errors
    ///
    /// See [`LinkRule::new`].
    pub fn file(
        source: impl AsRef<Path>,
        target: impl AsRef<Path>,
        flags: LinkFlags,
    ) -> CoreResult<Self> {
        Self::new(source, target, LinkKind::File, flags)
    }

    /// Build a directory rule.
    ///
    /// # Errors
    ///
    /// See [`LinkRule::new`].
    pub fn directory(
        source: impl AsRef<Path>,
        target: impl AsRef<Path>,
        flags: LinkFlags,
    ) -> CoreResult<Self> {
        Self::new(source, target, LinkKind::Directory, flags)
    }

    /// Real path on disk.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Virtual path seen by intercepted processes.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// File or directory.
    #[must_use]
    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    /// Behaviour flags.
    #[must_use]
    pub fn flags(&self) -> LinkFlags {
        self.flags
    }

    /// Whether linking this rule walks the source subtree.
    #[must_use]
    pub fn is_recursive(&self) -> bool {
        self.kind == LinkKind::Directory && self.flags.contains(LinkFlags::RECURSIVE)
    }

    /// Whether this rule needs a change watcher on its source.
    #[must_use]
    pub fn is_monitored(&self) -> bool {
        self.is_recursive() && self.flags.contains(LinkFlags::MONITOR_CHANGES)
    }
}

impl fmt::Display for LinkRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} (flags {:#x})",
            self.kind,
            self.source.display(),
            self.target.display(),
            self.flags.bits()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_rule_cannot_be_recursive() {
        let base = std::env::temp_dir();
        let res = LinkRule::file(base.join("a"), base.join("b"), LinkFlags::RECURSIVE);
        assert!(matches!(res, Err(CoreError::InvalidRule(_))));
    }

    #[test]
    fn test_relative_paths_rejected() {
        let base = std::env::temp_dir();
        let res = LinkRule::directory("mods/a", base.join("b"), LinkFlags::empty());
        assert!(matches!(res, Err(CoreError::RelativePath { .. })));

        let res = LinkRule::directory(base.join("a"), "data", LinkFlags::empty());
        assert!(matches!(res, Err(CoreError::RelativePath { .. })));
    }

    #[test]
    fn test_paths_are_normalized() {
        let base = std::env::temp_dir();
        let rule = LinkRule::directory(
            base.join("mods/./a/../b"),
            base.join("game/data/"),
            LinkFlags::RECURSIVE,
        )
        .unwrap();
        assert_eq!(rule.source(), base.join("mods").join("b"));
        assert_eq!(rule.target(), base.join("game").join("data"));
        assert!(rule.is_recursive());
        assert!(!rule.is_monitored());
    }
}
