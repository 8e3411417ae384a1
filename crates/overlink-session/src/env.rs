//! Environment variables that hand a session to a launched process.

/// Runtime directory holding the session channels.
pub const ENV_RUNTIME_DIR: &str = "OVERLINK_RUNTIME_DIR";
/// Name of the mapping channel.
pub const ENV_SHM: &str = "OVERLINK_SHM";
/// Name of the process channel.
pub const ENV_INVERSE_SHM: &str = "OVERLINK_INVERSE_SHM";
/// Instance name.
pub const ENV_INSTANCE: &str = "OVERLINK_INSTANCE";
/// Log filter for the interception layer.
pub const ENV_LOG_LEVEL: &str = "OVERLINK_LOG_LEVEL";
