use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::{CoreError, CoreResult};

/// Lexically normalizes an absolute path.
///
/// Removes `.` components and folds `..` into its parent. Does NOT touch the
/// filesystem, so symlinks are not resolved.
///
/// # Errors
///
/// Returns [`CoreError::RelativePath`] if `path` is not absolute, or
/// [`CoreError::InvalidRule`] if `..` would climb above the root.
pub fn normalize(path: &Path) -> CoreResult<PathBuf> {
    if !path.is_absolute() {
        return Err(CoreError::RelativePath {
            path: path.to_path_buf(),
        });
    }

    let mut normalized = PathBuf::new();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {},
            Component::ParentDir => {
                if depth == 0 {
                    return Err(CoreError::InvalidRule(format!(
                        "path climbs above the root: {}",
                        path.display()
                    )));
                }
                normalized.pop();
                depth = depth.saturating_sub(1);
            },
            Component::Normal(name) => {
                normalized.push(name);
                depth = depth.saturating_add(1);
            },
        }
    }

    Ok(normalized)
}

/// Lookup key for a virtual path.
///
/// Built from a normalized absolute path with `/` separators. Case is folded
/// on Windows, where the filesystem is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualKey(String);

impl VirtualKey {
    /// Build a key from an already-normalized absolute path.
    #[must_use]
    pub fn from_normalized(path: &Path) -> Self {
        Self::from_components(path.components())
    }

    /// Build a key from a sequence of path components.
    pub(crate) fn from_components<'a>(components: impl IntoIterator<Item = Component<'a>>) -> Self {
        let mut key = String::new();
        for component in components {
            match component {
                Component::Prefix(prefix) => key.push_str(&prefix.as_os_str().to_string_lossy()),
                Component::RootDir => key.push('/'),
                Component::Normal(name) => {
                    if !key.ends_with('/') {
                        key.push('/');
                    }
                    key.push_str(&name.to_string_lossy());
                },
                Component::CurDir | Component::ParentDir => {},
            }
        }
        Self(fold_case(key))
    }

    /// The key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VirtualKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(windows)]
fn fold_case(key: String) -> String {
    key.to_lowercase()
}

#[cfg(not(windows))]
fn fold_case(key: String) -> String {
    key
}

/// Whether `path` is `ancestor` or lies beneath it, compared by key.
#[must_use]
pub fn is_within(path: &Path, ancestor: &Path) -> bool {
    let path_key = VirtualKey::from_normalized(path);
    let ancestor_key = VirtualKey::from_normalized(ancestor);
    let (p, a) = (path_key.as_str(), ancestor_key.as_str());

    p == a
        || p.strip_prefix(a)
            .is_some_and(|rest| a.ends_with('/') || rest.starts_with('/'))
}
