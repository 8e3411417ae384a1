//! Test fixtures: isolated runtime directories, unique instances and
//! throwaway file trees.
//!
//! Fixtures panic on setup failure; they are only ever used from tests.

#![allow(clippy::missing_panics_doc)]

use std::fs;
use std::path::{Path, PathBuf};

use overlink_config::Config;
use overlink_core::SessionParameters;
use tempfile::TempDir;
use uuid::Uuid;

/// A temporary runtime directory for session channels.
///
/// Each test gets its own, so concurrently running tests never see each
/// other's sessions.
pub struct TempRuntime {
    dir: TempDir,
}

impl TempRuntime {
    /// Create a fresh runtime directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp runtime dir"),
        }
    }

    /// Root of the runtime directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A default configuration pointing at this runtime directory, with
    /// short lock and proxy timeouts.
    #[must_use]
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.session.runtime_dir = Some(self.dir.path().to_path_buf());
        config.session.lock_timeout_ms = 2000;
        config.injection.proxy_timeout_secs = 5;
        config.injection.detach = false;
        config.watch.debounce_ms = 50;
        config
    }
}

impl Default for TempRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters for an instance whose name no other test uses.
#[must_use]
pub fn unique_instance(prefix: &str) -> SessionParameters {
    let suffix = Uuid::new_v4().simple().to_string();
    let name = format!("{prefix}_{}", &suffix[..12]);
    SessionParameters::named(name).expect("valid generated instance name")
}

/// A throwaway directory tree on disk.
pub struct TestTree {
    dir: TempDir,
}

impl TestTree {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp tree"),
        }
    }

    /// Root of the tree.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of `rel` inside the tree.
    #[must_use]
    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Write a file (creating parents) and return its path.
    pub fn file(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, contents).expect("write fixture file");
        path
    }

    /// Create a directory (and parents) and return its path.
    pub fn dir(&self, rel: &str) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(&path).expect("create fixture dir");
        path
    }

    /// Write every file in `files` under `rel` and return the directory.
    pub fn populate(&self, rel: &str, files: &[&str]) -> PathBuf {
        let root = self.dir(rel);
        for file in files {
            self.file(&format!("{rel}/{file}"), file);
        }
        root
    }
}

impl Default for TestTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
