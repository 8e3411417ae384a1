//! Run command - launch a process under a mapping manifest.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use overlink::{CrashDumpsType, Engine, LogLevel, MappingManifest, init_parameters};
use overlink_config::Config;
use tracing::debug;

use crate::theme::Theme;

/// How often `--wait` checks the attached-process set.
const WAIT_POLL: Duration = Duration::from_millis(250);

/// Options for `overlink run`.
pub(crate) struct RunOptions {
    pub(crate) instance: String,
    pub(crate) mapping: PathBuf,
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) blacklist: Vec<String>,
    pub(crate) force_loads: Vec<(String, PathBuf)>,
    pub(crate) debug: bool,
    pub(crate) wait: bool,
    pub(crate) command: Vec<String>,
}

/// Parse a `process=library` pair.
pub(crate) fn parse_force_load(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((process, library)) if !process.is_empty() && !library.is_empty() => {
            Ok((process.to_owned(), PathBuf::from(library)))
        },
        _ => Err(format!("expected <process>=<library>, got '{value}'")),
    }
}

/// Create the session, apply the manifest and launch the command.
pub(crate) fn run_process(config: &Config, options: RunOptions) -> Result<()> {
    let manifest = MappingManifest::load(&options.mapping)
        .with_context(|| format!("failed to load mapping {}", options.mapping.display()))?;
    let params = init_parameters(
        &options.instance,
        options.debug,
        if options.debug { LogLevel::Debug } else { LogLevel::Info },
        CrashDumpsType::None,
        PathBuf::new(),
    )?;

    let mut engine = Engine::new(config);
    for name in &options.blacklist {
        engine.blacklist_executable(name);
    }
    for (process, library) in &options.force_loads {
        engine.force_load_library(process, library)?;
    }

    engine.create_vfs(&params)?;
    engine.apply_manifest(&manifest)?;
    println!(
        "{}",
        Theme::success(&format!(
            "Session {} ready ({} rules, {} entries)",
            options.instance,
            engine.mapping().rules().len(),
            engine.mapping().len()
        ))
    );

    let pid = engine.run_argv(options.command, options.cwd)?;
    println!("{}", Theme::success(&format!("Started process {pid}")));

    if options.wait {
        println!("{}", Theme::info("Waiting for attached processes to exit"));
        loop {
            let attached = engine.attached_process_ids()?;
            if attached.value().is_empty() {
                break;
            }
            debug!(count = attached.available(), "Processes still attached");
            std::thread::sleep(WAIT_POLL);
        }
        println!("{}", Theme::success("All attached processes exited"));
    } else {
        println!(
            "{}",
            Theme::dimmed("Session stays alive while the process runs")
        );
    }

    engine.disconnect_vfs()?;
    Ok(())
}
