//! Post-merge configuration validation.

use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_session(config)?;
    validate_injection(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_session(config: &Config) -> ConfigResult<()> {
    let s = &config.session;

    if s.process_list_capacity == 0 {
        return Err(ConfigError::ValidationError {
            field: "session.process_list_capacity".to_owned(),
            message: "must be at least 1".to_owned(),
        });
    }

    // One byte is always spent on the terminator.
    if s.name_buffer_size < 2 {
        return Err(ConfigError::ValidationError {
            field: "session.name_buffer_size".to_owned(),
            message: format!("{} is too small; must be at least 2", s.name_buffer_size),
        });
    }

    if s.lock_timeout_ms == 0 {
        return Err(ConfigError::ValidationError {
            field: "session.lock_timeout_ms".to_owned(),
            message: "must be at least 1".to_owned(),
        });
    }

    Ok(())
}

fn validate_injection(config: &Config) -> ConfigResult<()> {
    let i = &config.injection;

    if i.proxy_timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "injection.proxy_timeout_secs".to_owned(),
            message: "must be at least 1".to_owned(),
        });
    }

    let paths = [
        ("injection.module_32", i.module_32.as_deref()),
        ("injection.module_64", i.module_64.as_deref()),
        ("injection.proxy_32", i.proxy_32.as_deref()),
        ("injection.proxy_64", i.proxy_64.as_deref()),
    ];
    for (field, path) in paths {
        require_absolute(field, path)?;
    }

    Ok(())
}

fn require_absolute(field: &str, path: Option<&Path>) -> ConfigResult<()> {
    match path {
        Some(p) if !p.is_absolute() => Err(ConfigError::ValidationError {
            field: field.to_owned(),
            message: format!("path must be absolute: {}", p.display()),
        }),
        _ => Ok(()),
    }
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::ValidationError {
            field: "logging.level".to_owned(),
            message: format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        });
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(ConfigError::ValidationError {
            field: "logging.format".to_owned(),
            message: format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        });
    }

    Ok(())
}
