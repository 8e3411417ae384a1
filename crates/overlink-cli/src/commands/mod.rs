//! Subcommand implementations.

pub(crate) mod resolve;
pub(crate) mod run;
pub(crate) mod status;
