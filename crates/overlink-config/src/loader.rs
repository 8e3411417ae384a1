//! Config file discovery and layered loading.
//!
//! Implements the `Config::load()` algorithm:
//! 1. Parse `defaults.toml` → base
//! 2. Merge `/etc/overlink/config.toml` (system)
//! 3. Merge the user config (`$OVERLINK_HOME/config.toml`, or
//!    `<user config dir>/overlink/config.toml`)
//! 4. Merge the explicit file passed by the caller, if any
//! 5. Apply `OVERLINK_*` environment overrides
//! 6. Deserialize merged tree → `Config`
//! 7. Validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{HOME_VAR, apply_env_overrides, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge_tracking, record_leaves};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// System-wide configuration file.
const SYSTEM_CONFIG: &str = "/etc/overlink/config.toml";

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// A resolved configuration together with where each value came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The final merged configuration.
    pub config: Config,
    /// Dotted field path → which layer set the value.
    pub field_sources: FieldSources,
    /// Config file paths that were loaded (in precedence order).
    pub loaded_files: Vec<String>,
}

/// Where each layer is read from.
///
/// [`load`] fills this from the real environment; tests build it by hand.
#[derive(Debug, Clone, Default)]
pub struct LoadSources {
    /// System config file, skipped if `None` or absent.
    pub system: Option<PathBuf>,
    /// User config file, skipped if `None` or absent.
    pub user: Option<PathBuf>,
    /// Explicit config file; must exist when set.
    pub explicit: Option<PathBuf>,
    /// Environment variables consulted for overrides.
    pub env: HashMap<String, String>,
}

/// Load the configuration with the full precedence chain.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed, if `explicit`
/// cannot be read, or if the final merged configuration fails validation.
pub fn load(explicit: Option<&Path>) -> ConfigResult<ResolvedConfig> {
    let env = collect_env_vars();
    let user = user_config_path(&env);
    load_from(LoadSources {
        system: Some(PathBuf::from(SYSTEM_CONFIG)),
        user,
        explicit: explicit.map(Path::to_path_buf),
        env,
    })
}

/// Load the configuration from explicitly chosen layers.
///
/// # Errors
///
/// See [`load`].
pub fn load_from(sources: LoadSources) -> ConfigResult<ResolvedConfig> {
    // 1. Parse embedded defaults.
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_leaves(&merged, "", &ConfigLayer::Defaults, &mut field_sources);

    // 2–3. System and user layers are optional.
    let optional_layers = [
        (sources.system.as_deref(), ConfigLayer::System),
        (sources.user.as_deref(), ConfigLayer::User),
    ];
    for (path, layer) in optional_layers {
        let Some(path) = path else { continue };
        if let Some(overlay) = try_load_file(path)? {
            deep_merge_tracking(&mut merged, &overlay, "", &layer, &mut field_sources);
            loaded_files.push(path.display().to_string());
            info!(path = %path.display(), layer = %layer, "loaded config");
        }
    }

    // 4. The explicit layer must exist.
    if let Some(path) = sources.explicit.as_deref() {
        let overlay = read_file(path)?;
        deep_merge_tracking(
            &mut merged,
            &overlay,
            "",
            &ConfigLayer::Explicit,
            &mut field_sources,
        );
        loaded_files.push(path.display().to_string());
        info!(path = %path.display(), "loaded explicit config");
    }

    // 5. Environment overrides.
    let env_count = apply_env_overrides(&mut merged, &mut field_sources, &sources.env)?;
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable overrides");
    }

    // 6. Deserialize.
    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    // 7. Validate.
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Load a config from a single file on top of the defaults (no other
/// layering).
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or parsed, or if the
/// result fails validation.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    load_from(LoadSources {
        explicit: Some(path.to_path_buf()),
        ..LoadSources::default()
    })
    .map(|resolved| resolved.config)
}

/// User config path: `$OVERLINK_HOME/config.toml` when set, otherwise
/// `<user config dir>/overlink/config.toml`.
fn user_config_path<S: ::std::hash::BuildHasher>(
    env: &HashMap<String, String, S>,
) -> Option<PathBuf> {
    if let Some(home) = env.get(HOME_VAR).filter(|h| !h.is_empty()) {
        return Some(PathBuf::from(home).join("config.toml"));
    }

    match user_config_dir() {
        Ok(dir) => Some(dir.join("config.toml")),
        Err(e) => {
            debug!(error = %e, "no user config directory, skipping user layer");
            None
        },
    }
}

/// Per-user configuration directory for overlink.
///
/// # Errors
///
/// Returns [`ConfigError::NoConfigDir`] if the platform reports none.
pub fn user_config_dir() -> ConfigResult<PathBuf> {
    directories::ProjectDirs::from("", "", "overlink")
        .map(|d| d.config_dir().to_path_buf())
        .ok_or(ConfigError::NoConfigDir)
}

/// Try to load a file, returning `None` if the file doesn't exist.
///
/// Uses a single read operation to avoid TOCTOU races (no separate
/// exists/metadata checks before reading).
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    match read_file(path) {
        Ok(value) => Ok(Some(value)),
        Err(ConfigError::ReadError { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            debug!(path = %path.display(), "config file not found, skipping");
            Ok(None)
        },
        Err(e) => Err(e),
    }
}

fn read_file(path: &Path) -> ConfigResult<toml::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    // Check size after reading to avoid TOCTOU between stat and read.
    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {} byte limit",
                content.len(),
                MAX_CONFIG_FILE_SIZE
            ),
        });
    }

    toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_deserialize_to_default_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        let resolved = load_from(LoadSources::default()).unwrap();
        assert_eq!(resolved.config, Config::default());
        assert!(resolved.loaded_files.is_empty());
        assert_eq!(
            resolved.field_sources.get("session.process_list_capacity"),
            Some(&ConfigLayer::Defaults)
        );
    }

    #[test]
    fn test_missing_optional_layers_are_skipped() {
        let resolved = load_from(LoadSources {
            system: Some(PathBuf::from("/nonexistent/overlink/system.toml")),
            user: Some(PathBuf::from("/nonexistent/overlink/user.toml")),
            ..LoadSources::default()
        })
        .unwrap();
        assert!(resolved.loaded_files.is_empty());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = load_file(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_user_path_prefers_overlink_home() {
        let mut env = HashMap::new();
        env.insert(HOME_VAR.to_owned(), "/srv/overlink".to_owned());
        assert_eq!(
            user_config_path(&env),
            Some(PathBuf::from("/srv/overlink/config.toml"))
        );
    }

    #[test]
    fn test_oversized_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("huge.toml");
        let data = "x = \"".to_owned() + &"a".repeat(1_100_000) + "\"";
        std::fs::write(&file_path, data).unwrap();

        let result = try_load_file(&file_path);
        assert!(
            matches!(result, Err(ConfigError::ValidationError { .. })),
            "Expected ValidationError for oversized config, got: {result:?}"
        );
    }
}
