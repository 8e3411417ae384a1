//! Overlink Session - shared session channels and their lifecycle.
//!
//! A session is a named, file-backed shared region under the runtime
//! directory. The [`VfsController`] creates or connects to one and returns a
//! [`SessionHandle`]; launched processes read the published mapping through
//! an [`InterceptionClient`].
//!
//! # Example
//!
//! ```rust,no_run
//! use overlink_config::Config;
//! use overlink_core::{LinkFlags, LinkRule, MappingTable, SessionParameters};
//! use overlink_session::VfsController;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let controller = VfsController::from_config(&Config::default());
//! let params = SessionParameters::named("game")?;
//! let mut session = controller.create(&params)?;
//!
//! let mut table = MappingTable::new();
//! table.link(LinkRule::directory("/mods/a", "/game/data", LinkFlags::RECURSIVE)?)?;
//! session.set_mapping(table)?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

/// File-backed shared region.
pub mod channel;
/// Interception-side reader.
pub mod client;
/// Environment handed to launched processes.
pub mod env;
mod error;
/// Controller and handles.
pub mod handle;
/// Process liveness probes.
pub mod liveness;
/// On-disk records.
pub mod record;
mod watcher;

pub use channel::{ChannelLock, SessionChannel};
pub use client::InterceptionClient;
pub use error::{SessionError, SessionResult};
pub use handle::{ControllerOptions, SessionHandle, SessionStatus, VfsController};
pub use record::{HandleRecord, HandleRole, MappingSnapshot, ProcessRecord, SessionRecord};
pub use watcher::ChangeWatcher;
