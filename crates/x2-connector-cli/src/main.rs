//! x2 - command line client for the x2 backend.
//!
//! Logs in, issues authenticated requests and keeps a session alive, with
//! the session token persisted between runs.

mod commands;
mod config;

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use x2_connector_core::{FileBackend, PersistentSession, X2Connector};

use commands::Command;
use config::CliConfig;

// ============================================================================
// Constants
// ============================================================================

/// Directory for a daily rolling log file, in addition to stderr
const LOG_DIR_ENV: &str = "X2_LOG_DIR";

const LOG_FILE_PREFIX: &str = "x2.log";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

async fn connect(config: &CliConfig) -> Result<X2Connector> {
    let backend = FileBackend::in_cache_dir()?;
    info!(path = %backend.path().display(), "Using session storage");

    let x2 = X2Connector::builder()
        .storage(PersistentSession::new(Arc::new(backend)))
        .build()?;
    x2.init(config.init_options())
        .await
        .context("Failed to initialize connector")?;
    Ok(x2)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;
    if command == Command::Help {
        println!("{}", commands::USAGE);
        return Ok(());
    }

    let config = CliConfig::load()?.with_overrides(|key| std::env::var(key).ok());
    info!("x2 starting");

    let x2 = connect(&config).await?;
    commands::run(command, &x2, &config).await
}
