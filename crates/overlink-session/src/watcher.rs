//! Change watcher for monitored link sources.
//!
//! ```text
//! filesystem events (notify)
//!   → keep create/modify/remove
//!   → map to the monitored source root
//!   → debounce per root
//!   → re-expand under the channel lock
//!   → publish the next generation
//! ```
//!
//! The watcher runs on one background thread and stops when dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::channel::SessionChannel;
use crate::error::{SessionError, SessionResult};

/// Idle wait when nothing is pending.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Keeps a session's published table in step with its monitored sources.
pub struct ChangeWatcher {
    sources: Vec<PathBuf>,
    /// Dropping this closes the event channel, which ends the worker.
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

impl ChangeWatcher {
    /// Watch `sources` and republish into `channel` after `debounce`.
    ///
    /// Sources that do not exist yet are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Watch`] if the platform watcher cannot be
    /// created or the worker thread cannot be spawned.
    pub fn start(
        channel: SessionChannel,
        sources: Vec<PathBuf>,
        debounce: Duration,
    ) -> SessionResult<Self> {
        let (raw_tx, raw_rx) = mpsc::channel::<notify::Result<Event>>();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(|e| SessionError::Watch(e.to_string()))?;

        for source in &sources {
            match watcher.watch(source, RecursiveMode::Recursive) {
                Ok(()) => info!(path = %source.display(), "Watching link source"),
                Err(e) => warn!(
                    path = %source.display(),
                    error = %e,
                    "Failed to watch link source"
                ),
            }
        }

        let roots = sources.clone();
        let worker = std::thread::Builder::new()
            .name(format!("overlink-watch-{}", channel.name()))
            .spawn(move || run(&channel, &roots, &raw_rx, debounce))
            .map_err(|e| SessionError::Watch(e.to_string()))?;

        Ok(Self {
            sources,
            watcher: Some(watcher),
            worker: Some(worker),
        })
    }

    /// Watched source roots.
    #[must_use]
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        drop(self.watcher.take());
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("Change watcher thread panicked");
        }
    }
}

fn run(
    channel: &SessionChannel,
    roots: &[PathBuf],
    raw_rx: &mpsc::Receiver<notify::Result<Event>>,
    debounce: Duration,
) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        let now = Instant::now();
        let wait = pending
            .values()
            .min()
            .map_or(IDLE_WAIT, |deadline| deadline.saturating_duration_since(now));

        match raw_rx.recv_timeout(wait) {
            Ok(Ok(event)) => note_event(&event, roots, &mut pending, debounce),
            Ok(Err(e)) => warn!(error = %e, "Filesystem watcher error"),
            Err(RecvTimeoutError::Timeout) => {},
            Err(RecvTimeoutError::Disconnected) => {
                debug!(channel = %channel.name(), "Change watcher stopping");
                return;
            },
        }

        let now = Instant::now();
        let ready: Vec<PathBuf> = pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(root, _)| root.clone())
            .collect();
        if ready.is_empty() {
            continue;
        }
        for root in &ready {
            pending.remove(root);
        }

        match republish(channel, &ready) {
            Ok(Some(generation)) => info!(
                channel = %channel.name(),
                generation,
                roots = ready.len(),
                "Republished mapping after source change"
            ),
            Ok(None) => {},
            Err(e) => warn!(
                channel = %channel.name(),
                error = %e,
                "Failed to republish mapping after source change"
            ),
        }
    }
}

fn note_event(
    event: &Event,
    roots: &[PathBuf],
    pending: &mut HashMap<PathBuf, Instant>,
    debounce: Duration,
) {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {},
        _ => return,
    }

    for path in &event.paths {
        let Some(root) = owning_root(path, roots) else {
            continue;
        };
        debug!(path = %path.display(), root = %root.display(), kind = ?event.kind, "Source change");
        if let Some(deadline) = Instant::now().checked_add(debounce) {
            pending.insert(root.to_path_buf(), deadline);
        }
    }
}

/// Longest watched root containing `path`.
fn owning_root<'a>(path: &Path, roots: &'a [PathBuf]) -> Option<&'a Path> {
    roots
        .iter()
        .filter(|root| path.starts_with(root))
        .max_by_key(|root| root.components().count())
        .map(PathBuf::as_path)
}

/// Re-expand the rules under `roots` in the current snapshot. Returns the new
/// generation, or `None` if nothing needed republishing.
fn republish(channel: &SessionChannel, roots: &[PathBuf]) -> SessionResult<Option<u64>> {
    let lock = channel.lock()?;
    let Some(snapshot) = channel.read_snapshot()? else {
        return Ok(None);
    };

    let mut table = snapshot.table;
    let mut refreshed = 0usize;
    for root in roots {
        refreshed = refreshed.saturating_add(table.refresh_source(root)?);
    }
    if refreshed == 0 {
        return Ok(None);
    }

    channel.publish(table, &lock).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owning_root_prefers_deepest() {
        let roots = vec![PathBuf::from("/mods"), PathBuf::from("/mods/a")];
        assert_eq!(
            owning_root(Path::new("/mods/a/x.txt"), &roots),
            Some(Path::new("/mods/a"))
        );
        assert_eq!(
            owning_root(Path::new("/mods/b/y.txt"), &roots),
            Some(Path::new("/mods"))
        );
        assert_eq!(owning_root(Path::new("/other"), &roots), None);
    }

    #[test]
    fn test_note_event_ignores_access() {
        let roots = vec![PathBuf::from("/mods")];
        let mut pending = HashMap::new();

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/mods/a.txt"));
        note_event(&access, &roots, &mut pending, Duration::from_millis(10));
        assert!(pending.is_empty());

        let create = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(PathBuf::from("/mods/a.txt"));
        note_event(&create, &roots, &mut pending, Duration::from_millis(10));
        assert!(pending.contains_key(Path::new("/mods")));
    }
}
