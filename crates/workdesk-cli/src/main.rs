//! Workdesk CLI - a command-line client for the Workdesk management API.
//!
//! Logs in against the auth API, keeps credentials in the OS keychain (or a
//! file), and prints management resources as JSON.

mod commands;

use std::io;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use workdesk_core::Config;

use commands::Cli;

/// Log file name prefix inside the cache directory's `logs/` folder
const LOG_FILE: &str = "workdesk.log";

/// Initialize the tracing subscriber for logging.
///
/// Warnings and errors go to stderr; the same events are also written to a
/// daily rolling file under the cache directory when one is available. The
/// returned guard flushes the file writer on drop.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match Config::cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir.join("logs"), LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let _log_guard = init_tracing();
    info!("workdesk starting");

    let result = commands::run(cli).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Command failed");
    }
    result
}
