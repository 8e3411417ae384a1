//! Overlink Test - shared test utilities.
//!
//! Add to a crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! overlink-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use overlink_test::{TempRuntime, unique_instance};
//!
//! let runtime = TempRuntime::new();
//! let params = unique_instance("scenario");
//! let config = runtime.config();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;

pub use fixtures::*;
