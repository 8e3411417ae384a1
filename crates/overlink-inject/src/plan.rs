//! Injection plans: everything needed to start one hooked process.

use std::path::{Path, PathBuf};
use std::process::Command;

use overlink_core::SessionParameters;
use overlink_session::SessionHandle;
use overlink_session::env::{ENV_INSTANCE, ENV_INVERSE_SHM, ENV_LOG_LEVEL, ENV_RUNTIME_DIR, ENV_SHM};
use serde::{Deserialize, Serialize};

use crate::image::WordSize;

/// How a launched process finds its session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEnv {
    /// Runtime directory holding the channels.
    pub runtime_dir: PathBuf,
    /// Instance name.
    pub instance: String,
    /// Mapping channel name.
    pub shm_name: String,
    /// Process channel name.
    pub inverse_shm_name: String,
    /// Log filter for the interception layer.
    pub log_filter: String,
}

impl SessionEnv {
    /// Environment for the session named by `params` under `runtime_dir`.
    #[must_use]
    pub fn new(runtime_dir: &Path, params: &SessionParameters) -> Self {
        let log_filter = if params.debug_mode() {
            "debug"
        } else {
            params.log_level().as_filter()
        };
        Self {
            runtime_dir: runtime_dir.to_path_buf(),
            instance: params.instance_name().to_owned(),
            shm_name: params.current_shm_name().to_owned(),
            inverse_shm_name: params.current_inverse_shm_name().to_owned(),
            log_filter: log_filter.to_owned(),
        }
    }

    /// Environment for an attached session handle.
    #[must_use]
    pub fn for_handle(handle: &SessionHandle) -> Self {
        Self::new(handle.channel().runtime_dir(), handle.params())
    }

    /// Variables to export, as (name, value) pairs.
    #[must_use]
    pub fn vars(&self) -> [(&'static str, String); 5] {
        [
            (ENV_RUNTIME_DIR, self.runtime_dir.display().to_string()),
            (ENV_INSTANCE, self.instance.clone()),
            (ENV_SHM, self.shm_name.clone()),
            (ENV_INVERSE_SHM, self.inverse_shm_name.clone()),
            (ENV_LOG_LEVEL, self.log_filter.clone()),
        ]
    }

    /// Export the variables on `command`.
    pub fn apply(&self, command: &mut Command) {
        command.env(ENV_RUNTIME_DIR, &self.runtime_dir);
        for (name, value) in self.vars().into_iter().skip(1) {
            command.env(name, value);
        }
    }
}

/// Resolved launch: which image, which module, which extra libraries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionPlan {
    /// Resolved executable.
    pub executable: PathBuf,
    /// Word size of `executable`.
    pub word_size: WordSize,
    /// Interception module matching `word_size`.
    pub module: PathBuf,
    /// Libraries force-loaded after the module, in order.
    pub forced_loads: Vec<PathBuf>,
    /// Session the process joins.
    pub session: SessionEnv,
}

impl InjectionPlan {
    /// Whether the controller can inject without a proxy.
    #[must_use]
    pub fn is_direct(&self) -> bool {
        self.word_size == WordSize::host()
    }

    /// Module followed by forced loads: the full preload list.
    pub fn libraries(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.module.as_path()).chain(self.forced_loads.iter().map(PathBuf::as_path))
    }
}
