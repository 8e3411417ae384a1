//! The engine: one caller's view of a virtual filesystem session.
//!
//! An [`Engine`] owns a local [`MappingTable`] and [`ExecutionPolicy`] and at
//! most one attached [`SessionHandle`]. Link operations edit the local table
//! and, while a session is attached, publish it straight away, so the
//! session always reflects the engine's rules. The policy is never
//! published; it only affects launches made through this engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use overlink_config::Config;
use overlink_core::{
    Bounded, ExecutionPolicy, LinkFlags, LinkRule, MappingManifest, MappingTable,
    SessionParameters,
};
use overlink_inject::{Injector, LaunchRequest, Launcher};
use overlink_session::{SessionHandle, SessionStatus, VfsController};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};

/// Virtual filesystem engine.
#[derive(Debug)]
pub struct Engine {
    controller: VfsController,
    session: Option<SessionHandle>,
    table: MappingTable,
    policy: ExecutionPolicy,
    launcher: Launcher,
}

impl Engine {
    /// Engine configured from `config`, injecting with loader preloading.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            controller: VfsController::from_config(config),
            session: None,
            table: MappingTable::new(),
            policy: ExecutionPolicy::new(),
            launcher: Launcher::with_preload(config.injection.clone()),
        }
    }

    /// Engine that injects through `injector`.
    #[must_use]
    pub fn with_injector(config: &Config, injector: Arc<dyn Injector>) -> Self {
        Self {
            launcher: Launcher::new(config.injection.clone(), injector),
            ..Self::new(config)
        }
    }

    /// Lifecycle state of the engine's session. `Disconnected` sticks until
    /// the next create or connect.
    #[must_use]
    pub fn state(&self) -> SessionStatus {
        self.session
            .as_ref()
            .map_or(SessionStatus::Uninitialized, SessionHandle::status)
    }

    /// The attached session, if any.
    #[must_use]
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session
            .as_ref()
            .filter(|handle| handle.status().is_attached())
    }

    /// Create the session named by `params` and publish the current rules
    /// into it.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AlreadyAttached`] if this engine holds a session.
    /// - [`SessionError::AlreadyExists`](overlink_session::SessionError::AlreadyExists)
    ///   if a live session with that name exists elsewhere.
    pub fn create_vfs(&mut self, params: &SessionParameters) -> EngineResult<()> {
        self.ensure_detached()?;
        let mut handle = self.controller.create(params)?;
        if !self.table.is_empty() {
            handle.set_mapping(self.table.clone())?;
        }
        info!(
            instance = %params.instance_name(),
            rules = self.table.rules().len(),
            "Created virtual filesystem"
        );
        self.session = Some(handle);
        Ok(())
    }

    /// Connect to an existing session. The session's published rules
    /// replace the local table.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AlreadyAttached`] if this engine holds a session.
    /// - [`SessionError::NotFound`](overlink_session::SessionError::NotFound)
    ///   if no live session has that name.
    pub fn connect_vfs(&mut self, params: &SessionParameters) -> EngineResult<()> {
        self.ensure_detached()?;
        let handle = self.controller.connect(params)?;
        let snapshot = handle.mapping()?;
        info!(
            instance = %params.instance_name(),
            generation = snapshot.generation,
            "Connected to virtual filesystem"
        );
        self.table = snapshot.table;
        self.session = Some(handle);
        Ok(())
    }

    /// Detach from the session. Does nothing if none is attached.
    ///
    /// Processes already running keep the session alive.
    ///
    /// # Errors
    ///
    /// Returns a session error if the channel could not be updated. The
    /// engine is detached either way.
    pub fn disconnect_vfs(&mut self) -> EngineResult<()> {
        // The detached handle stays so `state` reports `Disconnected` until
        // the next create or connect replaces it.
        match self.session.as_mut() {
            Some(handle) if handle.status().is_attached() => {
                handle.disconnect()?;
                Ok(())
            },
            _ => Ok(()),
        }
    }

    /// Link the file `source` so it appears at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`](overlink_core::CoreError) for malformed or
    /// conflicting rules; nothing changes in that case.
    pub fn link_file(
        &mut self,
        source: impl AsRef<Path>,
        target: impl AsRef<Path>,
        flags: LinkFlags,
    ) -> EngineResult<()> {
        self.link(LinkRule::file(source, target, flags)?)
    }

    /// Link the directory `source` so it appears at `target`.
    ///
    /// # Errors
    ///
    /// See [`link_file`](Self::link_file).
    pub fn link_directory(
        &mut self,
        source: impl AsRef<Path>,
        target: impl AsRef<Path>,
        flags: LinkFlags,
    ) -> EngineResult<()> {
        self.link(LinkRule::directory(source, target, flags)?)
    }

    /// Add `rule`, publishing the result if a session is attached.
    ///
    /// # Errors
    ///
    /// Returns the rule or publish error; the table is unchanged on failure.
    pub fn link(&mut self, rule: LinkRule) -> EngineResult<()> {
        let mut candidate = self.table.clone();
        candidate.link(rule)?;
        self.commit(candidate)
    }

    /// Add every link in `manifest`.
    ///
    /// # Errors
    ///
    /// Returns the first rule error; the table is unchanged on failure.
    pub fn apply_manifest(&mut self, manifest: &MappingManifest) -> EngineResult<()> {
        let mut candidate = self.table.clone();
        for rule in manifest.rules()? {
            candidate.link(rule)?;
        }
        self.commit(candidate)
    }

    /// Remove every rule.
    ///
    /// # Errors
    ///
    /// Returns a session error if the empty table cannot be published.
    pub fn clear_mappings(&mut self) -> EngineResult<()> {
        self.commit(MappingTable::new())
    }

    /// Replace the local table with `table` and publish it.
    ///
    /// # Errors
    ///
    /// Returns a session error if publishing fails.
    pub fn set_mapping(&mut self, table: MappingTable) -> EngineResult<()> {
        self.commit(table)
    }

    /// The local mapping table.
    #[must_use]
    pub fn mapping(&self) -> &MappingTable {
        &self.table
    }

    /// Resolve `path` against the local table.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> Option<PathBuf> {
        self.table.resolve(path)
    }

    /// Launch `command_line` in `working_dir` (empty for the current
    /// directory) with interception attached. Returns the new process ID.
    ///
    /// The command line is split with the host's rules; use
    /// [`run_argv`](Self::run_argv) to pass arguments unambiguously.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NoSession`] if no session is attached.
    /// - [`InjectError`](overlink_inject::InjectError) for blacklisted
    ///   executables, proxy timeouts and failed launch stages.
    pub fn run_process(&mut self, command_line: &str, working_dir: &str) -> EngineResult<u32> {
        let request = LaunchRequest::parse(command_line, working_dir)?;
        self.launch(&request)
    }

    /// Launch an already split argument vector.
    ///
    /// # Errors
    ///
    /// See [`run_process`](Self::run_process).
    pub fn run_argv(
        &mut self,
        argv: Vec<String>,
        working_dir: Option<PathBuf>,
    ) -> EngineResult<u32> {
        let request = LaunchRequest::from_argv(argv, working_dir)?;
        self.launch(&request)
    }

    /// Name of the attached instance, cut to the diagnostic buffer size.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoSession`] if no session is attached.
    pub fn current_instance_name(&self) -> EngineResult<Bounded<String>> {
        Ok(self.attached()?.query_instance_name()?)
    }

    /// Whether the attached session is the instance `name`.
    ///
    /// Compares against the reported, possibly truncated, name by prefix.
    #[must_use]
    pub fn is_active_instance(&self, name: &str) -> bool {
        self.current_instance_name().is_ok_and(|reported| {
            let reported = reported.value();
            !reported.is_empty() && name.starts_with(reported.as_str())
        })
    }

    /// Running processes attached to the session, capped at the configured
    /// capacity.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoSession`] if no session is attached.
    pub fn attached_process_ids(&mut self) -> EngineResult<Bounded<Vec<u32>>> {
        let reaped = self.launcher.reap();
        if reaped > 0 {
            debug!(reaped, "Reaped exited children");
        }
        Ok(self.attached()?.query_process_list()?)
    }

    /// Never inject into executables named `name`.
    pub fn blacklist_executable(&mut self, name: &str) {
        self.policy.blacklist_executable(name);
    }

    /// Forget every blacklisted executable.
    pub fn clear_blacklist(&mut self) {
        self.policy.clear_blacklist();
    }

    /// Load `library` into every process named `process_name` at launch,
    /// after previously registered libraries for that name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`](overlink_core::CoreError) if the name is empty
    /// or the library path is relative.
    pub fn force_load_library(&mut self, process_name: &str, library: &Path) -> EngineResult<()> {
        self.policy.force_load_library(process_name, library)?;
        Ok(())
    }

    /// Forget every forced library load.
    pub fn clear_force_loads(&mut self) {
        self.policy.clear_force_loads();
    }

    /// The launch policy.
    #[must_use]
    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    fn launch(&mut self, request: &LaunchRequest) -> EngineResult<u32> {
        let session = self
            .session
            .as_ref()
            .filter(|handle| handle.status().is_attached())
            .ok_or(EngineError::NoSession)?;
        Ok(self.launcher.launch(request, &self.policy, session)?)
    }

    fn commit(&mut self, mut table: MappingTable) -> EngineResult<()> {
        if let Some(handle) = self.session.as_mut().filter(|h| h.status().is_attached()) {
            // Pick up files the watcher saw since the last publish.
            let sources: Vec<PathBuf> = table.monitored_sources().map(Path::to_path_buf).collect();
            for source in &sources {
                table.refresh_source(source)?;
            }
            handle.set_mapping(table.clone())?;
        }
        self.table = table;
        Ok(())
    }

    fn attached(&self) -> EngineResult<&SessionHandle> {
        self.session
            .as_ref()
            .filter(|handle| handle.status().is_attached())
            .ok_or(EngineError::NoSession)
    }

    fn ensure_detached(&self) -> EngineResult<()> {
        match self.session.as_ref() {
            Some(handle) if handle.status().is_attached() => Err(EngineError::AlreadyAttached {
                instance: handle.params().instance_name().to_owned(),
            }),
            _ => Ok(()),
        }
    }
}
