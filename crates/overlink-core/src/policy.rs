//! Execution policy: which executables are never injected, and which
//! libraries are force-loaded into which processes.
//!
//! Both tables are keyed by executable basename, compared case-insensitively.
//! They are consulted only when a process is launched.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CoreError, CoreResult};

/// Blacklist and forced library loads for injection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    blacklist: BTreeSet<String>,
    forced_loads: BTreeMap<String, Vec<PathBuf>>,
}

impl ExecutionPolicy {
    /// Create an empty policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclude an executable from injection. Idempotent.
    ///
    /// Only the basename of `name` is kept, so `C:\bin\tool.exe` and
    /// `TOOL.EXE` name the same executable.
    pub fn blacklist_executable(&mut self, name: &str) {
        let key = executable_key(name);
        if self.blacklist.insert(key.clone()) {
            debug!(executable = %key, "Blacklisted executable");
        }
    }

    /// Remove every blacklist entry.
    pub fn clear_blacklist(&mut self) {
        self.blacklist.clear();
    }

    /// Whether the executable at `path` (or named `path`) is blacklisted.
    #[must_use]
    pub fn is_blacklisted(&self, path: &Path) -> bool {
        self.blacklist
            .contains(&executable_key(&path.to_string_lossy()))
    }

    /// Blacklisted executable names.
    pub fn blacklist(&self) -> impl Iterator<Item = &str> {
        self.blacklist.iter().map(String::as_str)
    }

    /// Append `library` to the libraries loaded into `process_name`.
    ///
    /// Repeated calls for the same process append, preserving call order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RelativePath`] if `library` is not absolute.
    pub fn force_load_library(&mut self, process_name: &str, library: &Path) -> CoreResult<()> {
        if !library.is_absolute() {
            return Err(CoreError::RelativePath {
                path: library.to_path_buf(),
            });
        }

        let key = executable_key(process_name);
        debug!(process = %key, library = %library.display(), "Registered forced library load");
        self.forced_loads
            .entry(key)
            .or_default()
            .push(library.to_path_buf());
        Ok(())
    }

    /// Remove every forced library load.
    pub fn clear_force_loads(&mut self) {
        self.forced_loads.clear();
    }

    /// Libraries to load into the executable at `path`, in load order.
    #[must_use]
    pub fn forced_loads_for(&self, path: &Path) -> &[PathBuf] {
        self.forced_loads
            .get(&executable_key(&path.to_string_lossy()))
            .map_or(&[], Vec::as_slice)
    }
}

/// Lower-cased basename of an executable name, accepting either separator.
fn executable_key(name: &str) -> String {
    name.rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blacklist_matches_basename_case_insensitively() {
        let mut policy = ExecutionPolicy::new();
        policy.blacklist_executable(r"C:\Tools\Helper.EXE");
        policy.blacklist_executable("helper.exe");

        assert_eq!(policy.blacklist().count(), 1);
        assert!(policy.is_blacklisted(Path::new("/opt/tools/HELPER.exe")));
        assert!(policy.is_blacklisted(Path::new("helper.exe")));
        assert!(!policy.is_blacklisted(Path::new("/opt/tools/game.exe")));

        policy.clear_blacklist();
        assert!(!policy.is_blacklisted(Path::new("helper.exe")));
    }

    #[test]
    fn test_forced_loads_append_in_order() {
        let base = std::env::temp_dir();
        let mut policy = ExecutionPolicy::new();
        policy.force_load_library("Game.exe", &base.join("a.dll")).unwrap();
        policy.force_load_library("game.exe", &base.join("b.dll")).unwrap();

        assert_eq!(
            policy.forced_loads_for(&base.join("bin/GAME.EXE")),
            &[base.join("a.dll"), base.join("b.dll")]
        );
        assert!(policy.forced_loads_for(Path::new("other.exe")).is_empty());

        policy.clear_force_loads();
        assert!(policy.forced_loads_for(Path::new("game.exe")).is_empty());
    }

    #[test]
    fn test_forced_load_requires_absolute_library() {
        let mut policy = ExecutionPolicy::new();
        let res = policy.force_load_library("game.exe", Path::new("lib/a.dll"));
        assert!(matches!(res, Err(CoreError::RelativePath { .. })));
    }
}
