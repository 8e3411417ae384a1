//! On-disk records of a session channel.

use std::fmt;

use chrono::{DateTime, Utc};
use overlink_core::MappingTable;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::liveness;

/// How a handle joined the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleRole {
    /// Created the session.
    Owner,
    /// Connected to an existing session.
    Peer,
}

impl fmt::Display for HandleRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => f.write_str("owner"),
            Self::Peer => f.write_str("peer"),
        }
    }
}

/// One controller handle attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleRecord {
    /// Unique handle ID.
    pub id: Uuid,
    /// Process holding the handle.
    pub pid: u32,
    /// Owner or peer.
    pub role: HandleRole,
    /// When the handle attached.
    pub attached_at: DateTime<Utc>,
}

impl HandleRecord {
    pub(crate) fn new(role: HandleRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            pid: liveness::current_pid(),
            role,
            attached_at: Utc::now(),
        }
    }
}

/// Session metadata: identity plus the attached controller handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Instance name the session was created under.
    pub instance_name: String,
    /// When the owner created the session.
    pub created_at: DateTime<Utc>,
    /// Attached controller handles.
    pub handles: Vec<HandleRecord>,
}

impl SessionRecord {
    pub(crate) fn new(instance_name: &str, owner: HandleRecord) -> Self {
        Self {
            instance_name: instance_name.to_owned(),
            created_at: Utc::now(),
            handles: vec![owner],
        }
    }

    /// Drop handles whose process has exited. Returns how many were dropped.
    pub(crate) fn prune_dead_handles(&mut self) -> usize {
        let before = self.handles.len();
        self.handles.retain(|h| liveness::is_alive(h.pid));
        before.saturating_sub(self.handles.len())
    }
}

/// One published version of the mapping table.
///
/// Snapshots are immutable once written; a new publish replaces the whole
/// file, so readers always see a complete version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSnapshot {
    /// Monotonic version number, starting at 0 for the empty table.
    pub generation: u64,
    /// When this version was published.
    pub published_at: DateTime<Utc>,
    /// The table itself.
    pub table: MappingTable,
}

/// Marker for one attached process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Attached process.
    pub pid: u32,
    /// Process that registered it.
    pub registered_by: u32,
    /// When it was registered.
    pub registered_at: DateTime<Utc>,
}
