//! Structured logging setup for binaries embedding the dispatcher.

use std::io::{self, IsTerminal};

use parking_lot::Mutex;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::Subscriber;
use tracing_subscriber::{fmt, EnvFilter};

use crate::dispatch::config::{LogConfig, LogFormat};

static INSTALLED: Mutex<bool> = Mutex::new(false);

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(String),
    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] SetGlobalDefaultError),
}

/// Installs the global `fmt` subscriber described by `config`.
///
/// Only the first successful call installs anything; later calls return
/// `Ok(())` without validating their config.
///
/// # Errors
///
/// `Filter` if the directives do not parse, `Install` if another subscriber
/// was already set outside this function.
pub fn init_tracing(config: &LogConfig) -> Result<(), TelemetryError> {
    let mut installed = INSTALLED.lock();
    if *installed {
        return Ok(());
    }
    tracing::subscriber::set_global_default(build_subscriber(config)?)?;
    *installed = true;
    Ok(())
}

fn build_subscriber(config: &LogConfig) -> Result<Box<dyn Subscriber + Send + Sync>, TelemetryError> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|e| TelemetryError::Filter(e.to_string()))?;
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal());

    Ok(match config.format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Pretty => Box::new(builder.finish()),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
