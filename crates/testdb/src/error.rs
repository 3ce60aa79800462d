//! Error types for provisioning, connecting and cleanup.

use crate::config::Dialect;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, TestDbError>;

/// Top-level errors returned by the provisioning and connection helpers.
#[derive(Error, Debug)]
pub enum TestDbError {
    /// The container runtime failed (unreachable, start failure, port lookup).
    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// The DSN could not be interpreted for the requested dialect.
    #[error("Invalid {dialect} DSN {dsn:?}: {reason}")]
    InvalidDsn {
        dialect: Dialect,
        dsn: String,
        reason: String,
    },

    /// The liveness probe never succeeded within the retry budget.
    #[error("Unable to connect to {dialect} ({dsn}): {source}")]
    ConnectFailed {
        dialect: Dialect,
        dsn: String,
        #[source]
        source: sqlx::Error,
    },

    /// The retry loop was cancelled before the database became ready.
    #[error("Connecting to {dialect} was cancelled")]
    Cancelled { dialect: Dialect },

    /// Connecting failed and the container could not be removed afterwards.
    #[error("{connect}; additionally failed to purge container {container}: {purge}")]
    ConnectFailedAndLeaked {
        connect: Box<TestDbError>,
        container: String,
        purge: RuntimeError,
    },

    /// Purging provisioned containers failed.
    #[error(transparent)]
    Cleanup(#[from] CleanupError),
}

impl TestDbError {
    /// Create an invalid DSN error.
    pub fn invalid_dsn(dialect: Dialect, dsn: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDsn {
            dialect,
            dsn: dsn.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while talking to the container runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The runtime binary or daemon could not be reached.
    #[error("Could not connect to docker: {0}")]
    Unavailable(String),

    /// Spawning the runtime command failed.
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The container did not start.
    #[error("Failed to start container from {image}: {stderr}")]
    StartFailed { image: String, stderr: String },

    /// No host port is published for the requested container port.
    #[error("No host port published for {container_port} on container {container}")]
    PortNotFound {
        container: String,
        container_port: String,
    },

    /// Removing the container failed.
    #[error("Failed to purge container {container}: {stderr}")]
    PurgeFailed { container: String, stderr: String },
}

/// Every container that could not be purged during cleanup.
#[derive(Error, Debug)]
#[error("Failed to purge {} of {attempted} test containers: {}", .failures.len(), summarize(.failures))]
pub struct CleanupError {
    /// Number of containers cleanup tried to remove.
    pub attempted: usize,
    /// Failures, one per container that is still around.
    pub failures: Vec<RuntimeError>,
}

fn summarize(failures: &[RuntimeError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
