//! Overlink core types.
//!
//! Link rules and the mapping table that resolves virtual paths to real
//! ones, the execution policy consulted at launch, and the parameters that
//! identify a session. Everything here is process-local; sharing a table
//! across processes is the session crate's job.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

/// Fixed-capacity query results.
pub mod bounded;
/// Core error types.
pub mod error;
/// Link rule flags.
pub mod flags;
/// Declarative mapping manifests.
pub mod manifest;
/// Session parameters.
pub mod params;
/// Path normalization and lookup keys.
pub mod path;
/// Execution policy (blacklist and forced loads).
pub mod policy;
/// Link rules.
pub mod rule;
/// The mapping table.
pub mod table;

pub use bounded::Bounded;
pub use error::{CoreError, CoreResult};
pub use flags::LinkFlags;
pub use manifest::{LinkEntry, MappingManifest};
pub use params::{CrashDumpsType, LogLevel, SessionParameters};
pub use policy::ExecutionPolicy;
pub use rule::{LinkKind, LinkRule};
pub use table::{MappedEntry, MappingTable};
