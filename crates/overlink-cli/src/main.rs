//! Overlink CLI - run processes inside a virtual filesystem overlay.

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod commands;
mod theme;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use overlink::config_bridge;
use overlink_config::Config;

use commands::{resolve, run, status};

/// Overlink - per-process virtual filesystem overlay
#[derive(Parser)]
#[command(name = "overlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a configuration file layered over the defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a session from a mapping manifest and launch a process in it
    Run {
        /// Instance name of the session to create
        #[arg(short, long)]
        instance: String,

        /// Mapping manifest (TOML or JSON)
        #[arg(short, long)]
        mapping: PathBuf,

        /// Working directory for the launched process
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Executable name that must never be hooked (repeatable)
        #[arg(long = "blacklist", value_name = "EXE")]
        blacklist: Vec<String>,

        /// Library to load into a process at launch (repeatable)
        #[arg(
            long = "force-load",
            value_name = "PROCESS=LIBRARY",
            value_parser = run::parse_force_load
        )]
        force_loads: Vec<(String, PathBuf)>,

        /// Run the session in debug mode
        #[arg(long)]
        debug: bool,

        /// Wait until every attached process has exited
        #[arg(short, long)]
        wait: bool,

        /// Program and arguments to launch
        #[arg(last = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },

    /// Show a live session's mapping and attached processes
    Status {
        /// Instance name of the session
        #[arg(short, long)]
        instance: String,
    },

    /// Resolve a virtual path in a live session
    Resolve {
        /// Instance name of the session
        #[arg(short, long)]
        instance: String,

        /// Virtual path to resolve
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())
        .context("failed to load configuration")?
        .config;

    let mut log_config = config_bridge::to_log_config(&config, false);
    if cli.verbose {
        "debug".clone_into(&mut log_config.level);
    }
    if let Err(e) = overlink_telemetry::init_once(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match cli.command {
        Commands::Run {
            instance,
            mapping,
            cwd,
            blacklist,
            force_loads,
            debug,
            wait,
            command,
        } => {
            run::run_process(
                &config,
                run::RunOptions {
                    instance,
                    mapping,
                    cwd,
                    blacklist,
                    force_loads,
                    debug,
                    wait,
                    command,
                },
            )?;
        },
        Commands::Status { instance } => {
            status::show_status(&config, &instance)?;
        },
        Commands::Resolve { instance, path } => {
            resolve::resolve_path(&config, &instance, &path)?;
        },
    }

    Ok(())
}
