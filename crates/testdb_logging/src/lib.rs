//! Tracing setup for test binaries that provision databases.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, Once};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "testdb=info";

/// Checked before `RUST_LOG`.
pub const LOG_FILTER_ENV: &str = "TESTDB_LOG";

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Log at debug level regardless of the environment filter
    pub verbose: bool,
    /// Append plain-text logs to this file as well
    pub log_file: Option<PathBuf>,
}

/// Install a tracing subscriber writing to stderr and, optionally, a file.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let console_filter = if config.verbose {
        EnvFilter::new("testdb=debug")
    } else {
        env_filter()
    };

    let file_layer = match &config.log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create log directory: {}", parent.display())
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_filter(env_filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Install a subscriber whose output is captured by the test harness.
///
/// Safe to call from every test; only the first call has an effect.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        // Another subscriber may already be installed by the test binary.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_test_writer()
            .try_init();
    });
}

/// Filter from `TESTDB_LOG`, then `RUST_LOG`, then the default.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_FILTER_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}
