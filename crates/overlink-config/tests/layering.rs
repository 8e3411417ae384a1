//! Precedence across every configuration layer.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use overlink_config::merge::ConfigLayer;
use overlink_config::{ConfigError, LoadSources, loader};

fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn later_layers_win_field_by_field() {
    let dir = tempfile::tempdir().unwrap();
    let system = write(
        &dir,
        "system.toml",
        "[session]\nprocess_list_capacity = 8\nname_buffer_size = 32\n",
    );
    let user = write(
        &dir,
        "user.toml",
        "[session]\nprocess_list_capacity = 16\n[watch]\ndebounce_ms = 50\n",
    );
    let explicit = write(&dir, "explicit.toml", "[logging]\nlevel = \"debug\"\n");

    let mut env = HashMap::new();
    env.insert("OVERLINK_LOG_LEVEL".to_owned(), "warn".to_owned());
    env.insert("OVERLINK_RUNTIME_DIR".to_owned(), "/run/overlink-test".to_owned());

    let resolved = loader::load_from(LoadSources {
        system: Some(system),
        user: Some(user),
        explicit: Some(explicit),
        env,
    })
    .unwrap();

    let config = &resolved.config;
    assert_eq!(config.session.process_list_capacity, 16);
    assert_eq!(config.session.name_buffer_size, 32);
    assert_eq!(config.watch.debounce_ms, 50);
    assert_eq!(config.logging.level, "warn");
    assert_eq!(
        config.session.runtime_dir(),
        PathBuf::from("/run/overlink-test")
    );
    assert_eq!(config.injection.proxy_timeout_secs, 30);

    assert_eq!(resolved.loaded_files.len(), 3);
    assert_eq!(
        resolved.field_sources.get("session.name_buffer_size"),
        Some(&ConfigLayer::System)
    );
    assert_eq!(
        resolved.field_sources.get("session.process_list_capacity"),
        Some(&ConfigLayer::User)
    );
    assert_eq!(
        resolved.field_sources.get("logging.level"),
        Some(&ConfigLayer::Environment)
    );
}

#[test]
fn invalid_merged_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let explicit = write(&dir, "bad.toml", "[session]\nname_buffer_size = 1\n");

    let result = loader::load_from(LoadSources {
        explicit: Some(explicit),
        ..LoadSources::default()
    });
    assert!(matches!(result, Err(ConfigError::ValidationError { field, .. }) if field == "session.name_buffer_size"));
}

#[test]
fn malformed_file_reports_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let explicit = write(&dir, "broken.toml", "[session\n");

    match loader::load_from(LoadSources {
        explicit: Some(explicit.clone()),
        ..LoadSources::default()
    }) {
        Err(ConfigError::ParseError { path, .. }) => {
            assert_eq!(path, explicit.display().to_string());
        },
        other => panic!("expected parse error, got {other:?}"),
    }
}
