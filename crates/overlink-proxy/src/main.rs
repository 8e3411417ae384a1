//! Overlink Proxy - launches hooked processes on behalf of a controller
//! built for the other word size.
//!
//! Speaks newline-delimited JSON over stdio: one request per line on stdin,
//! one response per line on stdout. Logs go to stderr so they never mix
//! with the protocol.

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]

use anyhow::{Context, Result};
use clap::Parser;
use overlink_inject::{PreloadInjector, serve};
use overlink_telemetry::{LogConfig, LogTarget, init_once};
use tracing::info;

/// Overlink launch proxy.
#[derive(Parser)]
#[command(name = "overlink-proxy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level filter for the proxy's own diagnostics
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Keep launched processes in the proxy's process group
    #[arg(long)]
    no_detach: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::new(&cli.log_level).with_target(LogTarget::Stderr);
    if let Err(e) = init_once(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!(
        pid = std::process::id(),
        word_size = usize::BITS,
        "Proxy ready"
    );

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(stdin.lock(), stdout.lock(), &PreloadInjector, !cli.no_detach)
        .context("proxy channel failed")?;

    info!("Controller closed the channel, proxy exiting");
    Ok(())
}
