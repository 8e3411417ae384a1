//! Bridge from [`overlink_config::Config`] to the types the engine hands to
//! its collaborators.

use overlink_config::Config;
use overlink_telemetry::{LogConfig, LogFormat, LogTarget};

/// Convert the `[logging]` section to a [`LogConfig`].
///
/// With `to_local_file` logs go to daily-rolling files in the configured
/// log directory, otherwise to stderr.
#[must_use]
pub fn to_log_config(cfg: &Config, to_local_file: bool) -> LogConfig {
    let format = match cfg.logging.format.as_str() {
        "pretty" => LogFormat::Pretty,
        "json" => LogFormat::Json,
        "full" => LogFormat::Full,
        _ => LogFormat::Compact,
    };

    let mut log_config = LogConfig::new(&cfg.logging.level).with_format(format);
    log_config = if to_local_file {
        let directory = cfg.logging.directory_or(&cfg.session.runtime_dir());
        log_config.with_file_logging(directory)
    } else {
        log_config.with_target(LogTarget::Stderr)
    };

    for directive in &cfg.logging.directives {
        log_config = log_config.with_directive(directive);
    }
    log_config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_stderr_when_not_local() {
        let mut cfg = Config::default();
        cfg.logging.format = "json".to_owned();
        cfg.logging.directives = vec!["overlink_session=trace".to_owned()];

        let log = to_log_config(&cfg, false);
        assert_eq!(log.target, LogTarget::Stderr);
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.directives, vec!["overlink_session=trace".to_owned()]);
    }

    #[test]
    fn test_local_file_uses_configured_directory() {
        let mut cfg = Config::default();
        cfg.logging.directory = Some(PathBuf::from("/var/log/overlink"));

        let log = to_log_config(&cfg, true);
        assert_eq!(log.target, LogTarget::File(PathBuf::from("/var/log/overlink")));
    }

    #[test]
    fn test_local_file_defaults_under_runtime_dir() {
        let mut cfg = Config::default();
        cfg.session.runtime_dir = Some(PathBuf::from("/run/overlink"));

        let log = to_log_config(&cfg, true);
        assert_eq!(log.target, LogTarget::File(PathBuf::from("/run/overlink/logs")));
    }

    #[test]
    fn test_unknown_format_falls_back_to_compact() {
        let mut cfg = Config::default();
        cfg.logging.format = "fancy".to_owned();
        assert_eq!(to_log_config(&cfg, false).format, LogFormat::Compact);
    }
}
