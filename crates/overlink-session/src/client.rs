//! Interception-side view of a session.
//!
//! This is what the in-process interception layer links against: it never
//! takes part in the session lifecycle, it only reads published snapshots
//! and reports process IDs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use overlink_core::{MappingTable, SessionParameters};
use tracing::debug;

use crate::channel::SessionChannel;
use crate::env::{ENV_INSTANCE, ENV_INVERSE_SHM, ENV_RUNTIME_DIR, ENV_SHM};
use crate::error::{SessionError, SessionResult};

const CLIENT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Reader of a session's published mapping.
#[derive(Debug)]
pub struct InterceptionClient {
    instance: String,
    channel: SessionChannel,
    generation: Option<u64>,
    table: MappingTable,
}

impl InterceptionClient {
    /// Open the session named by `params` under `runtime_dir` and load its
    /// current snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] if nothing has been published.
    pub fn open(runtime_dir: &Path, params: &SessionParameters) -> SessionResult<Self> {
        let channel = SessionChannel::for_params(runtime_dir, params, CLIENT_LOCK_TIMEOUT);
        Self::from_channel(params.instance_name().to_owned(), channel)
    }

    /// Open the session handed down through the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingEnv`] if a variable is unset.
    pub fn from_env() -> SessionResult<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingEnv`] if `lookup` yields nothing for a
    /// required variable.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> SessionResult<Self> {
        let require = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or(SessionError::MissingEnv(name))
        };

        let runtime_dir = PathBuf::from(require(ENV_RUNTIME_DIR)?);
        let shm = require(ENV_SHM)?;
        let inverse = require(ENV_INVERSE_SHM)?;
        let instance = require(ENV_INSTANCE)?;

        let channel = SessionChannel::new(&runtime_dir, &shm, &inverse, CLIENT_LOCK_TIMEOUT);
        Self::from_channel(instance, channel)
    }

    fn from_channel(instance: String, channel: SessionChannel) -> SessionResult<Self> {
        let mut client = Self {
            instance,
            channel,
            generation: None,
            table: MappingTable::new(),
        };
        if !client.refresh()? {
            return Err(SessionError::NotFound {
                instance: client.instance,
            });
        }
        Ok(client)
    }

    /// Instance name.
    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.instance
    }

    /// Generation of the loaded snapshot.
    #[must_use]
    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    /// The loaded table.
    #[must_use]
    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    /// Reload the snapshot if a newer one was published. Returns whether the
    /// loaded table changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read.
    pub fn refresh(&mut self) -> SessionResult<bool> {
        let Some(snapshot) = self.channel.read_snapshot()? else {
            return Ok(false);
        };
        if self.generation == Some(snapshot.generation) {
            return Ok(false);
        }

        debug!(
            instance = %self.instance,
            from = ?self.generation,
            to = snapshot.generation,
            "Loaded mapping snapshot"
        );
        self.generation = Some(snapshot.generation);
        self.table = snapshot.table;
        Ok(true)
    }

    /// Real path for `path`, or `None` to fall through to the real
    /// filesystem.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> Option<PathBuf> {
        self.table.resolve(path)
    }

    /// Where a file created at `path` should land.
    #[must_use]
    pub fn create_target(&self, path: &Path) -> Option<PathBuf> {
        self.table.create_target(path)
    }

    /// Report `pid` as attached (e.g. a child of the hooked process).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] if the session has ended.
    pub fn register(&self, pid: u32) -> SessionResult<()> {
        self.channel.register_process(pid)
    }

    /// Report that `pid` is no longer attached.
    ///
    /// # Errors
    ///
    /// Returns an error if the process marker cannot be removed.
    pub fn unregister(&self, pid: u32) -> SessionResult<bool> {
        self.channel.unregister_process(pid)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_from_vars_reports_missing_variable() {
        let vars: HashMap<&str, String> = HashMap::from([
            (ENV_RUNTIME_DIR, "/tmp/overlink".to_owned()),
            (ENV_SHM, "game".to_owned()),
        ]);
        let res = InterceptionClient::from_vars(|name| vars.get(name).cloned());
        assert!(matches!(
            res,
            Err(SessionError::MissingEnv(ENV_INVERSE_SHM))
        ));
    }

    #[test]
    fn test_open_without_snapshot_is_not_found() {
        let tmp = tempfile::TempDir::new().unwrap();
        let params = SessionParameters::named("nobody").unwrap();
        assert!(matches!(
            InterceptionClient::open(tmp.path(), &params),
            Err(SessionError::NotFound { .. })
        ));
    }
}
