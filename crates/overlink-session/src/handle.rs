//! VFS controller and session handles.
//!
//! ```text
//! Uninitialized ──create──▶ Created ───┐
//!       │                              ├──disconnect──▶ Disconnected
//!       └──────connect────▶ Connected ─┘
//! ```
//!
//! A session stays alive while any handle is attached or any registered
//! process is still running. The last one out tears the channel down.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use overlink_config::Config;
use overlink_core::{Bounded, MappingTable, SessionParameters};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::SessionChannel;
use crate::error::{SessionError, SessionResult};
use crate::record::{HandleRecord, HandleRole, MappingSnapshot, SessionRecord};
use crate::watcher::ChangeWatcher;

/// Lifecycle state of a session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// No session has been created or connected.
    Uninitialized,
    /// This handle created the session and owns it.
    Created,
    /// This handle attached to a session created elsewhere.
    Connected,
    /// This handle has detached. Terminal.
    Disconnected,
}

impl SessionStatus {
    /// Whether the handle is attached to a live session.
    #[must_use]
    pub fn is_attached(self) -> bool {
        matches!(self, Self::Created | Self::Connected)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::Created => f.write_str("created"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Knobs for the controller, usually taken from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Root of all session channels.
    pub runtime_dir: PathBuf,
    /// How long to wait for the channel lock.
    pub lock_timeout: Duration,
    /// Maximum number of pids returned by a process-list query.
    pub process_list_capacity: usize,
    /// Buffer size, in bytes including the terminator, for name queries.
    pub name_buffer_size: usize,
    /// Debounce window for monitored sources.
    pub debounce: Duration,
}

impl ControllerOptions {
    /// Options from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            runtime_dir: config.session.runtime_dir(),
            lock_timeout: config.session.lock_timeout(),
            process_list_capacity: config.session.process_list_capacity,
            name_buffer_size: config.session.name_buffer_size,
            debounce: config.watch.debounce(),
        }
    }

    fn channel(&self, params: &SessionParameters) -> SessionChannel {
        SessionChannel::for_params(&self.runtime_dir, params, self.lock_timeout)
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Creates and connects sessions.
#[derive(Debug, Clone, Default)]
pub struct VfsController {
    options: ControllerOptions,
}

impl VfsController {
    /// Controller with the given options.
    #[must_use]
    pub fn new(options: ControllerOptions) -> Self {
        Self { options }
    }

    /// Controller configured from `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(ControllerOptions::from_config(config))
    }

    /// Controller options.
    #[must_use]
    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// Create the session named by `params` and become its owner.
    ///
    /// A leftover channel whose handles and processes have all exited is
    /// reclaimed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyExists`] if a live session with this
    /// instance name exists. The existing session is not touched.
    pub fn create(&self, params: &SessionParameters) -> SessionResult<SessionHandle> {
        let channel = self.options.channel(params);
        let lock = channel.lock()?;

        if let Some(mut record) = channel.read_record()? {
            record.prune_dead_handles();
            let live = channel.live_processes()?;
            if !record.handles.is_empty() || !live.is_empty() {
                return Err(SessionError::AlreadyExists {
                    instance: params.instance_name().to_owned(),
                });
            }
            warn!(
                instance = %params.instance_name(),
                "Reclaiming stale session channel"
            );
            channel.teardown(&lock)?;
        }

        let owner = HandleRecord::new(HandleRole::Owner);
        let record = SessionRecord::new(params.instance_name(), owner.clone());

        let initialized = channel
            .initialize(&lock)
            .and_then(|()| channel.publish(MappingTable::new(), &lock))
            .and_then(|_| channel.write_record(&record, &lock));
        if let Err(e) = initialized {
            if let Err(cleanup) = channel.teardown(&lock) {
                warn!(error = %cleanup, "Failed to clean up half-created session");
            }
            return Err(e);
        }
        drop(lock);

        info!(
            instance = %params.instance_name(),
            handle = %owner.id,
            dir = %channel.instance_dir().display(),
            "Created session"
        );
        Ok(SessionHandle::new(
            params.clone(),
            channel,
            self.options.clone(),
            owner.id,
            SessionStatus::Created,
        ))
    }

    /// Attach to the live session named by `params`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] if no live session exists.
    pub fn connect(&self, params: &SessionParameters) -> SessionResult<SessionHandle> {
        let channel = self.options.channel(params);
        let lock = channel.lock()?;

        let not_found = || SessionError::NotFound {
            instance: params.instance_name().to_owned(),
        };

        let mut record = channel.read_record()?.ok_or_else(not_found)?;
        let pruned = record.prune_dead_handles();
        if record.handles.is_empty() && channel.live_processes()?.is_empty() {
            debug!(instance = %params.instance_name(), "Found only a stale session");
            channel.teardown(&lock)?;
            return Err(not_found());
        }
        if pruned > 0 {
            debug!(instance = %params.instance_name(), pruned, "Pruned exited handles");
        }

        let peer = HandleRecord::new(HandleRole::Peer);
        record.handles.push(peer.clone());
        channel.write_record(&record, &lock)?;
        drop(lock);

        info!(
            instance = %params.instance_name(),
            handle = %peer.id,
            handles = record.handles.len(),
            "Connected to session"
        );
        Ok(SessionHandle::new(
            params.clone(),
            channel,
            self.options.clone(),
            peer.id,
            SessionStatus::Connected,
        ))
    }

    /// Whether a live session named by `params` exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the session record cannot be read.
    pub fn is_live(&self, params: &SessionParameters) -> SessionResult<bool> {
        let channel = self.options.channel(params);
        let Some(mut record) = channel.read_record()? else {
            return Ok(false);
        };
        record.prune_dead_handles();
        Ok(!record.handles.is_empty() || !channel.live_processes()?.is_empty())
    }
}

/// An attached view of one session.
///
/// Dropping an attached handle disconnects it.
#[derive(Debug)]
pub struct SessionHandle {
    params: SessionParameters,
    channel: SessionChannel,
    options: ControllerOptions,
    handle_id: Uuid,
    status: SessionStatus,
    watcher: Option<ChangeWatcher>,
}

impl SessionHandle {
    fn new(
        params: SessionParameters,
        channel: SessionChannel,
        options: ControllerOptions,
        handle_id: Uuid,
        status: SessionStatus,
    ) -> Self {
        Self {
            params,
            channel,
            options,
            handle_id,
            status,
            watcher: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Parameters the session was opened with.
    #[must_use]
    pub fn params(&self) -> &SessionParameters {
        &self.params
    }

    /// This handle's ID in the session record.
    #[must_use]
    pub fn handle_id(&self) -> Uuid {
        self.handle_id
    }

    /// Underlying channel.
    #[must_use]
    pub fn channel(&self) -> &SessionChannel {
        &self.channel
    }

    /// Whether a change watcher is running for this handle.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Publish `table` as the session's mapping, replacing the previous one
    /// in a single step. Returns the new generation.
    ///
    /// If the table has monitored rules, a change watcher is (re)started.
    /// On failure the previous watcher keeps running.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] unless the handle is attached,
    /// [`SessionError::LockTimeout`] if the channel stays locked, or
    /// [`SessionError::NotFound`] if the session is gone.
    pub fn set_mapping(&mut self, table: MappingTable) -> SessionResult<u64> {
        self.require_attached("set mapping")?;

        let sources: Vec<PathBuf> = table.monitored_sources().map(PathBuf::from).collect();
        // Stop the old watcher before taking the lock; its worker may be
        // waiting on it. It is restarted if nothing gets published.
        let previous = self.watcher.take().map(|w| w.sources().to_vec());

        let generation = match self.publish_locked(table) {
            Ok(generation) => generation,
            Err(e) => {
                if let Some(previous) = previous {
                    self.watcher = Some(ChangeWatcher::start(
                        self.channel.clone(),
                        previous,
                        self.options.debounce,
                    )?);
                }
                return Err(e);
            },
        };

        info!(
            instance = %self.params.instance_name(),
            generation,
            monitored = sources.len(),
            "Published mapping"
        );

        if !sources.is_empty() {
            self.watcher = Some(ChangeWatcher::start(
                self.channel.clone(),
                sources,
                self.options.debounce,
            )?);
        }
        Ok(generation)
    }

    fn publish_locked(&self, table: MappingTable) -> SessionResult<u64> {
        let lock = self.channel.lock()?;
        if self.channel.read_record()?.is_none() {
            return Err(SessionError::NotFound {
                instance: self.params.instance_name().to_owned(),
            });
        }
        self.channel.publish(table, &lock)
    }

    /// The currently published snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] unless attached, or
    /// [`SessionError::NotFound`] if the channel has disappeared.
    pub fn mapping(&self) -> SessionResult<MappingSnapshot> {
        self.require_attached("read mapping")?;
        self.channel
            .read_snapshot()?
            .ok_or_else(|| SessionError::NotFound {
                instance: self.params.instance_name().to_owned(),
            })
    }

    /// Running attached processes, capped at the configured capacity.
    ///
    /// Exited processes are pruned as a side effect.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] unless attached.
    pub fn query_process_list(&self) -> SessionResult<Bounded<Vec<u32>>> {
        self.require_attached("query process list")?;
        let pids = self.channel.live_processes()?;
        let result = Bounded::list(pids, self.options.process_list_capacity);
        if result.is_truncated() {
            warn!(
                instance = %self.params.instance_name(),
                available = result.available(),
                capacity = self.options.process_list_capacity,
                "Process list truncated"
            );
        }
        Ok(result)
    }

    /// The active instance name, cut to the configured buffer size.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] unless attached.
    pub fn query_instance_name(&self) -> SessionResult<Bounded<String>> {
        self.require_attached("query instance name")?;
        Ok(Bounded::text(
            self.params.instance_name(),
            self.options.name_buffer_size,
        ))
    }

    /// Add `pid` to the attached-process set.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] unless attached.
    pub fn register_process(&self, pid: u32) -> SessionResult<()> {
        self.require_attached("register process")?;
        self.channel.register_process(pid)
    }

    /// Remove `pid` from the attached-process set.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] unless attached.
    pub fn unregister_process(&self, pid: u32) -> SessionResult<bool> {
        self.require_attached("unregister process")?;
        self.channel.unregister_process(pid)
    }

    /// Controller handles currently recorded for the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] unless attached.
    pub fn handles(&self) -> SessionResult<Vec<HandleRecord>> {
        self.require_attached("list handles")?;
        Ok(self
            .channel
            .read_record()?
            .map(|record| record.handles)
            .unwrap_or_default())
    }

    /// Detach this handle.
    ///
    /// The channel is torn down only if no other handle is attached and no
    /// registered process is still running.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] if already disconnected. On an
    /// I/O error the handle is still marked disconnected.
    pub fn disconnect(&mut self) -> SessionResult<()> {
        self.require_attached("disconnect")?;
        let was = self.status;
        self.status = SessionStatus::Disconnected;
        self.watcher = None;

        let lock = self.channel.lock()?;
        let Some(mut record) = self.channel.read_record()? else {
            debug!(instance = %self.params.instance_name(), "Session already gone");
            return Ok(());
        };

        record.handles.retain(|h| h.id != self.handle_id);
        record.prune_dead_handles();
        let live = self.channel.live_processes()?;

        if record.handles.is_empty() && live.is_empty() {
            self.channel.teardown(&lock)?;
            info!(
                instance = %self.params.instance_name(),
                role = %was,
                "Disconnected and tore down session"
            );
        } else {
            self.channel.write_record(&record, &lock)?;
            info!(
                instance = %self.params.instance_name(),
                role = %was,
                handles = record.handles.len(),
                processes = live.len(),
                "Disconnected; session stays alive"
            );
        }
        Ok(())
    }

    fn require_attached(&self, operation: &'static str) -> SessionResult<()> {
        if self.status.is_attached() {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                status: self.status,
                operation,
            })
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.status.is_attached()
            && let Err(e) = self.disconnect()
        {
            warn!(
                instance = %self.params.instance_name(),
                error = %e,
                "Failed to disconnect session on drop"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlink_test::{TempRuntime, unique_instance};

    fn controller(runtime: &TempRuntime) -> VfsController {
        VfsController::from_config(&runtime.config())
    }

    #[test]
    fn test_create_then_disconnect_tears_down() {
        let runtime = TempRuntime::new();
        let controller = controller(&runtime);
        let params = unique_instance("lifecycle");

        let mut handle = controller.create(&params).unwrap();
        assert_eq!(handle.status(), SessionStatus::Created);
        assert_eq!(handle.mapping().unwrap().generation, 0);
        assert!(handle.mapping().unwrap().table.is_empty());
        assert!(controller.is_live(&params).unwrap());

        handle.disconnect().unwrap();
        assert_eq!(handle.status(), SessionStatus::Disconnected);
        assert!(!handle.channel().instance_dir().exists());
        assert!(!controller.is_live(&params).unwrap());
    }

    #[test]
    fn test_disconnected_is_terminal() {
        let runtime = TempRuntime::new();
        let controller = controller(&runtime);
        let mut handle = controller.create(&unique_instance("terminal")).unwrap();
        handle.disconnect().unwrap();

        assert!(matches!(
            handle.disconnect(),
            Err(SessionError::InvalidState {
                status: SessionStatus::Disconnected,
                operation: "disconnect",
            })
        ));
        assert!(matches!(
            handle.set_mapping(MappingTable::new()),
            Err(SessionError::InvalidState { .. })
        ));
        assert!(handle.query_process_list().is_err());
    }

    #[test]
    fn test_connect_without_session_is_not_found() {
        let runtime = TempRuntime::new();
        let res = controller(&runtime).connect(&unique_instance("missing"));
        assert!(matches!(res, Err(SessionError::NotFound { .. })));
    }

    #[test]
    fn test_drop_disconnects() {
        let runtime = TempRuntime::new();
        let controller = controller(&runtime);
        let params = unique_instance("dropped");
        {
            let _handle = controller.create(&params).unwrap();
        }
        assert!(!controller.is_live(&params).unwrap());
        // The name is free again.
        let _again = controller.create(&params).unwrap();
    }

    #[test]
    fn test_instance_name_query_truncates() {
        let runtime = TempRuntime::new();
        let mut config = runtime.config();
        config.session.name_buffer_size = 5;
        let controller = VfsController::from_config(&config);
        let params = unique_instance("longname");

        let handle = controller.create(&params).unwrap();
        let name = handle.query_instance_name().unwrap();
        assert_eq!(name.value(), "long");
        assert!(name.is_truncated());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SessionStatus::Created.to_string(), "created");
        assert!(SessionStatus::Connected.is_attached());
        assert!(!SessionStatus::Uninitialized.is_attached());
    }
}
