//! Configuration types.
//!
//! Every struct implements [`Default`] with the same values as the embedded
//! `defaults.toml`, so a bare `[section]` header produces a working
//! configuration.

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX, EXE_SUFFIX};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Directory under the system temp dir used when no runtime dir is set.
const DEFAULT_RUNTIME_DIR_NAME: &str = "overlink";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration for overlink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shared session channels and query capacities.
    pub session: SessionSection,
    /// Interception modules, proxy binaries and launch behaviour.
    pub injection: InjectionSection,
    /// Change-notification watcher.
    pub watch: WatchSection,
    /// Logging level, format and destination.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// SessionSection
// ---------------------------------------------------------------------------

/// Session channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Root directory of every shared session channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_dir: Option<PathBuf>,
    /// Maximum number of process IDs returned by a process-list query.
    pub process_list_capacity: usize,
    /// Size in bytes (including the terminator) of the instance-name buffer.
    pub name_buffer_size: usize,
    /// How long to wait for the session lock before giving up.
    pub lock_timeout_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            runtime_dir: None,
            process_list_capacity: 64,
            name_buffer_size: 64,
            lock_timeout_ms: 5000,
        }
    }
}

impl SessionSection {
    /// Effective runtime directory.
    #[must_use]
    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_RUNTIME_DIR_NAME))
    }

    /// Session lock timeout.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// InjectionSection
// ---------------------------------------------------------------------------

/// Injection and proxy settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionSection {
    /// Interception module for 32-bit targets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_32: Option<PathBuf>,
    /// Interception module for 64-bit targets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_64: Option<PathBuf>,
    /// Proxy binary built for 32-bit targets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_32: Option<PathBuf>,
    /// Proxy binary built for 64-bit targets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_64: Option<PathBuf>,
    /// Seconds to wait for a proxy acknowledgement.
    pub proxy_timeout_secs: u64,
    /// Launch targets and proxies outside the controller's process group.
    pub detach: bool,
}

impl Default for InjectionSection {
    fn default() -> Self {
        Self {
            module_32: None,
            module_64: None,
            proxy_32: None,
            proxy_64: None,
            proxy_timeout_secs: 30,
            detach: true,
        }
    }
}

impl InjectionSection {
    /// Interception module for a target of `bits` word size.
    ///
    /// Falls back to `<prefix>overlink_hook<bits><suffix>` next to the
    /// running executable.
    #[must_use]
    pub fn module_path(&self, bits: u32) -> PathBuf {
        let configured = if bits == 32 {
            self.module_32.as_ref()
        } else {
            self.module_64.as_ref()
        };
        configured.cloned().unwrap_or_else(|| {
            beside_current_exe(&format!("{DLL_PREFIX}overlink_hook{bits}{DLL_SUFFIX}"))
        })
    }

    /// Proxy binary for a target of `bits` word size.
    ///
    /// Falls back to `overlink-proxy-<bits>` next to the running executable.
    #[must_use]
    pub fn proxy_path(&self, bits: u32) -> PathBuf {
        let configured = if bits == 32 {
            self.proxy_32.as_ref()
        } else {
            self.proxy_64.as_ref()
        };
        configured
            .cloned()
            .unwrap_or_else(|| beside_current_exe(&format!("overlink-proxy-{bits}{EXE_SUFFIX}")))
    }

    /// Proxy acknowledgement timeout.
    #[must_use]
    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_timeout_secs)
    }
}

fn beside_current_exe(file_name: &str) -> PathBuf {
    std::env::current_exe()
        .ok()
        .as_deref()
        .and_then(Path::parent)
        .map_or_else(|| PathBuf::from(file_name), |dir| dir.join(file_name))
}

// ---------------------------------------------------------------------------
// WatchSection
// ---------------------------------------------------------------------------

/// Change-notification watcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSection {
    /// Quiet period after the last change before regenerating entries.
    pub debounce_ms: u64,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self { debounce_ms: 250 }
    }
}

impl WatchSection {
    /// Debounce window.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Directory for log files when logging to a local file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// Per-crate tracing directives (e.g. `["overlink_session=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directory: None,
            directives: Vec::new(),
        }
    }
}

impl LoggingSection {
    /// Effective log directory: the configured one, or `logs` under the
    /// runtime directory.
    #[must_use]
    pub fn directory_or(&self, runtime_dir: &Path) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| runtime_dir.join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_paths_win() {
        let section = InjectionSection {
            module_32: Some(PathBuf::from("/opt/hook32.so")),
            proxy_64: Some(PathBuf::from("/opt/proxy64")),
            ..InjectionSection::default()
        };
        assert_eq!(section.module_path(32), PathBuf::from("/opt/hook32.so"));
        assert_eq!(section.proxy_path(64), PathBuf::from("/opt/proxy64"));
    }

    #[test]
    fn test_default_paths_sit_beside_executable() {
        let section = InjectionSection::default();
        let module = section.module_path(64);
        let name = module.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.contains("overlink_hook64"), "{name}");

        let proxy = section.proxy_path(32);
        let exe_dir = std::env::current_exe().unwrap();
        assert_eq!(proxy.parent(), exe_dir.parent());
    }

    #[test]
    fn test_runtime_dir_defaults_under_temp() {
        let section = SessionSection::default();
        assert_eq!(section.runtime_dir(), std::env::temp_dir().join("overlink"));
        assert_eq!(section.lock_timeout(), Duration::from_secs(5));
    }
}
