//! Stockroom CLI - drives the warehouse-management session from a terminal.
//!
//! Logs in against the backend, remembers the session between runs, shows
//! which screens the user may reach, and can watch for inactivity to log
//! the user out automatically.

mod cli;
mod commands;

use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::Cli;

/// How long shutdown waits for a stdin read still parked in the blocking pool
const SHUTDOWN_TIMEOUT_MS: u64 = 100;

/// Initialize the tracing subscriber for logging
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
}

fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let guard = init_tracing();
    info!("Stockroom starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(commands::run(cli));
    runtime.shutdown_timeout(Duration::from_millis(SHUTDOWN_TIMEOUT_MS));

    // Flush buffered log lines before a possible early exit
    drop(guard);
    if let Err(ref e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
