//! The shared session channel.
//!
//! A session lives in two directories under the runtime directory:
//!
//! ```text
//! <runtime>/<name>.map.lock       exclusive lock, never deleted
//! <runtime>/<name>.map/
//!     session.json                 SessionRecord (handles)
//!     mapping.json                 MappingSnapshot (current table)
//! <runtime>/<name>.procs/
//!     <pid>                        ProcessRecord per attached process
//! ```
//!
//! The channel names carry the `.map` and `.procs` suffixes, so no two
//! instances share a directory or a lock file.
//!
//! Every file is replaced by writing a sibling temp file and renaming it
//! over the original, so readers never take the lock and never see a
//! partial write. Writers serialize on the lock file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use fs2::FileExt;
use overlink_core::{MappingTable, SessionParameters};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult, io_err};
use crate::liveness;
use crate::record::{MappingSnapshot, ProcessRecord, SessionRecord};

const RECORD_FILE: &str = "session.json";
const MAPPING_FILE: &str = "mapping.json";
const LOCK_POLL: Duration = Duration::from_millis(10);

/// Proof that the channel lock is held. Released on drop.
#[derive(Debug)]
pub struct ChannelLock {
    _file: File,
}

/// File-backed shared region of one session.
#[derive(Debug, Clone)]
pub struct SessionChannel {
    name: String,
    runtime_dir: PathBuf,
    instance_dir: PathBuf,
    inverse_dir: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl SessionChannel {
    /// Channel for the given channel names under `runtime_dir`.
    #[must_use]
    pub fn new(
        runtime_dir: &Path,
        shm_name: &str,
        inverse_shm_name: &str,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            name: shm_name.to_owned(),
            runtime_dir: runtime_dir.to_path_buf(),
            instance_dir: runtime_dir.join(shm_name),
            inverse_dir: runtime_dir.join(inverse_shm_name),
            lock_path: runtime_dir.join(format!("{shm_name}.lock")),
            lock_timeout,
        }
    }

    /// Channel named by `params`.
    #[must_use]
    pub fn for_params(
        runtime_dir: &Path,
        params: &SessionParameters,
        lock_timeout: Duration,
    ) -> Self {
        Self::new(
            runtime_dir,
            params.current_shm_name(),
            params.current_inverse_shm_name(),
            lock_timeout,
        )
    }

    /// Channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runtime directory the channel lives under.
    #[must_use]
    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    /// Directory holding the session record and mapping snapshot.
    #[must_use]
    pub fn instance_dir(&self) -> &Path {
        &self.instance_dir
    }

    /// Directory holding attached-process markers.
    #[must_use]
    pub fn inverse_dir(&self) -> &Path {
        &self.inverse_dir
    }

    /// Acquire the exclusive channel lock, polling until the configured
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LockTimeout`] if another writer holds the lock
    /// for longer than the timeout, or [`SessionError::Io`] if the lock file
    /// cannot be opened.
    pub fn lock(&self) -> SessionResult<ChannelLock> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .read(true)
            .open(&self.lock_path)
            .map_err(io_err(&self.lock_path))?;

        let deadline = Instant::now().checked_add(self.lock_timeout);
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(ChannelLock { _file: file }),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {},
                Err(e) => return Err(io_err(&self.lock_path)(e)),
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(SessionError::LockTimeout {
                    path: self.lock_path.clone(),
                });
            }
            std::thread::sleep(LOCK_POLL);
        }
    }

    /// Current session record, if the session exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or parsed.
    pub fn read_record(&self) -> SessionResult<Option<SessionRecord>> {
        read_json(&self.instance_dir.join(RECORD_FILE))
    }

    pub(crate) fn write_record(
        &self,
        record: &SessionRecord,
        _lock: &ChannelLock,
    ) -> SessionResult<()> {
        write_json_atomic(&self.instance_dir.join(RECORD_FILE), record)
    }

    /// Most recently published mapping snapshot.
    ///
    /// Lock-free: a concurrent publish is either fully visible or not at all.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read or parsed.
    pub fn read_snapshot(&self) -> SessionResult<Option<MappingSnapshot>> {
        read_json(&self.instance_dir.join(MAPPING_FILE))
    }

    /// Publish `table` as the next generation. Returns the new generation.
    pub(crate) fn publish(&self, table: MappingTable, _lock: &ChannelLock) -> SessionResult<u64> {
        let generation = self
            .read_snapshot()?
            .map_or(0, |current| current.generation.saturating_add(1));

        let snapshot = MappingSnapshot {
            generation,
            published_at: Utc::now(),
            table,
        };
        write_json_atomic(&self.instance_dir.join(MAPPING_FILE), &snapshot)?;
        debug!(
            channel = %self.name,
            generation,
            entries = snapshot.table.len(),
            "Published mapping snapshot"
        );
        Ok(generation)
    }

    pub(crate) fn initialize(&self, _lock: &ChannelLock) -> SessionResult<()> {
        std::fs::create_dir_all(&self.instance_dir).map_err(io_err(&self.instance_dir))?;
        std::fs::create_dir_all(&self.inverse_dir).map_err(io_err(&self.inverse_dir))?;
        Ok(())
    }

    pub(crate) fn teardown(&self, _lock: &ChannelLock) -> SessionResult<()> {
        for dir in [&self.instance_dir, &self.inverse_dir] {
            match std::fs::remove_dir_all(dir) {
                Ok(()) => {},
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => return Err(io_err(dir)(e)),
            }
        }
        debug!(channel = %self.name, "Tore down session channel");
        Ok(())
    }

    /// Add `pid` to the attached-process set.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] if the session no longer exists.
    pub fn register_process(&self, pid: u32) -> SessionResult<()> {
        let _lock = self.lock()?;
        self.require_live_record()?;

        let record = ProcessRecord {
            pid,
            registered_by: liveness::current_pid(),
            registered_at: Utc::now(),
        };
        std::fs::create_dir_all(&self.inverse_dir).map_err(io_err(&self.inverse_dir))?;
        write_json_atomic(&self.inverse_dir.join(pid.to_string()), &record)?;
        debug!(channel = %self.name, pid, "Registered attached process");
        Ok(())
    }

    /// Remove `pid` from the attached-process set. Returns whether it was
    /// present.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be removed.
    pub fn unregister_process(&self, pid: u32) -> SessionResult<bool> {
        let _lock = self.lock()?;
        let marker = self.inverse_dir.join(pid.to_string());
        match std::fs::remove_file(&marker) {
            Ok(()) => {
                debug!(channel = %self.name, pid, "Unregistered attached process");
                Ok(true)
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(marker)(e)),
        }
    }

    /// Attached processes that are still running, in ascending pid order.
    ///
    /// Markers of exited processes are removed as a side effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the inverse channel cannot be listed.
    pub fn live_processes(&self) -> SessionResult<Vec<u32>> {
        let entries = match std::fs::read_dir(&self.inverse_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.inverse_dir)(e)),
        };

        let mut pids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err(&self.inverse_dir))?;
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };

            if liveness::is_alive(pid) {
                pids.push(pid);
            } else if let Err(e) = std::fs::remove_file(entry.path()) {
                warn!(pid, error = %e, "Failed to prune exited process marker");
            } else {
                debug!(channel = %self.name, pid, "Pruned exited process");
            }
        }

        pids.sort_unstable();
        Ok(pids)
    }

    fn require_live_record(&self) -> SessionResult<SessionRecord> {
        self.read_record()?.ok_or_else(|| SessionError::NotFound {
            instance: self.name.clone(),
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> SessionResult<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path)(e)),
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| SessionError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Write `value` to a temp file beside `path`, then rename it into place.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> SessionResult<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let tmp = tempfile::Builder::new()
        .prefix(".tmp")
        .tempfile_in(parent)
        .map_err(io_err(parent))?;

    let mut writer = BufWriter::new(tmp);
    serde_json::to_writer(&mut writer, value).map_err(|e| SessionError::Corrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    writer.flush().map_err(io_err(path))?;

    let tmp = writer
        .into_inner()
        .map_err(|e| io_err(path)(e.into_error()))?;
    tmp.persist(path).map_err(|e| io_err(path)(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{HandleRecord, HandleRole};
    use overlink_core::{LinkFlags, LinkRule};
    use tempfile::TempDir;

    fn channel(tmp: &TempDir) -> SessionChannel {
        SessionChannel::new(
            tmp.path(),
            "unit.map",
            "unit.procs",
            Duration::from_millis(200),
        )
    }

    #[test]
    fn test_paths_follow_channel_names() {
        let tmp = TempDir::new().unwrap();
        let ch = channel(&tmp);
        assert_eq!(ch.runtime_dir(), tmp.path());
        assert_eq!(ch.instance_dir(), tmp.path().join("unit.map"));
        assert_eq!(ch.inverse_dir(), tmp.path().join("unit.procs"));
    }

    #[test]
    fn test_publish_increments_generation() {
        let tmp = TempDir::new().unwrap();
        let ch = channel(&tmp);
        let lock = ch.lock().unwrap();
        ch.initialize(&lock).unwrap();

        assert!(ch.read_snapshot().unwrap().is_none());
        assert_eq!(ch.publish(MappingTable::new(), &lock).unwrap(), 0);

        let mut table = MappingTable::new();
        let base = std::env::temp_dir();
        table
            .link(LinkRule::file(base.join("r"), base.join("v"), LinkFlags::empty()).unwrap())
            .unwrap();
        assert_eq!(ch.publish(table.clone(), &lock).unwrap(), 1);

        let snapshot = ch.read_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.table, table);
    }

    #[test]
    fn test_lock_times_out_while_held() {
        let tmp = TempDir::new().unwrap();
        let ch = channel(&tmp);
        let _held = ch.lock().unwrap();

        // A second open file description contends with the first.
        let res = ch.lock();
        assert!(matches!(res, Err(SessionError::LockTimeout { .. })));
    }

    #[test]
    fn test_process_registry_requires_session() {
        let tmp = TempDir::new().unwrap();
        let ch = channel(&tmp);
        let me = liveness::current_pid();

        assert!(matches!(
            ch.register_process(me),
            Err(SessionError::NotFound { .. })
        ));

        {
            let lock = ch.lock().unwrap();
            ch.initialize(&lock).unwrap();
            let record = SessionRecord::new("unit", HandleRecord::new(HandleRole::Owner));
            ch.write_record(&record, &lock).unwrap();
        }

        ch.register_process(me).unwrap();
        assert_eq!(ch.live_processes().unwrap(), vec![me]);
        assert!(ch.unregister_process(me).unwrap());
        assert!(!ch.unregister_process(me).unwrap());
        assert!(ch.live_processes().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_record_is_reported() {
        let tmp = TempDir::new().unwrap();
        let ch = channel(&tmp);
        std::fs::create_dir_all(ch.instance_dir()).unwrap();
        std::fs::write(ch.instance_dir().join(RECORD_FILE), "{not json").unwrap();

        assert!(matches!(ch.read_record(), Err(SessionError::Corrupt { .. })));
    }

    #[test]
    fn test_teardown_removes_both_directories() {
        let tmp = TempDir::new().unwrap();
        let ch = channel(&tmp);
        let lock = ch.lock().unwrap();
        ch.initialize(&lock).unwrap();
        ch.teardown(&lock).unwrap();
        assert!(!ch.instance_dir().exists());
        assert!(!ch.inverse_dir().exists());
        // Idempotent.
        ch.teardown(&lock).unwrap();
    }
}
