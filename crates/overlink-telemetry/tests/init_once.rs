//! Call-once logging initialisation. Runs in its own test binary because it
//! installs the global subscriber.

use overlink_telemetry::{LogConfig, LoggingInit, init_once};

#[test]
fn first_call_installs_and_later_calls_are_no_ops() {
    let dir = tempfile::tempdir().unwrap();
    let logs = dir.path().join("logs");
    let config = LogConfig::new("info").with_file_logging(&logs);

    assert_eq!(init_once(&config).unwrap(), LoggingInit::Installed);
    tracing::info!(test = "init_once", "written to the rolling file");

    // A second call with a different target changes nothing.
    let stderr = LogConfig::new("trace");
    assert_eq!(init_once(&stderr).unwrap(), LoggingInit::AlreadyInstalled);

    let files: Vec<_> = std::fs::read_dir(&logs)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(
        files.iter().any(|name| name.starts_with("overlink.")),
        "expected a daily log file, found {files:?}"
    );
}
