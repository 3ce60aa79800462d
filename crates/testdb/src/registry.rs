//! Tracking and cleanup of provisioned containers.

use crate::config::Dialect;
use crate::error::{CleanupError, RuntimeError, TestDbError};
use crate::runtime::{ContainerRuntime, DockerCli};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

/// A running container started for a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Container id reported by the runtime
    pub id: String,
    /// Container name
    pub name: String,
    /// Dialect of the database server inside
    pub dialect: Dialect,
    /// Host port the server port is published on
    pub host_port: u16,
}

/// Containers provisioned during a test run.
///
/// Appending is safe from any number of threads. Entries are only removed by
/// [`ResourceRegistry::purge_all`].
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    resources: Mutex<Vec<Resource>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Resource>> {
        // A panic while holding the lock cannot leave the Vec half-updated.
        self.resources
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track a started container.
    pub fn register(&self, resource: Resource) {
        info!(
            "Registered {} container {} on port {}",
            resource.dialect, resource.name, resource.host_port
        );
        self.lock().push(resource);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the tracked resources, in registration order.
    pub fn snapshot(&self) -> Vec<Resource> {
        self.lock().clone()
    }

    /// Purge every tracked container.
    ///
    /// Every container is attempted even if earlier ones fail. The registry
    /// is emptied either way; containers that could not be removed are
    /// reported in the returned error.
    pub fn purge_all(&self, runtime: &dyn ContainerRuntime) -> Result<(), CleanupError> {
        let resources = std::mem::take(&mut *self.lock());
        if resources.is_empty() {
            return Ok(());
        }

        info!("Purging {} test containers", resources.len());

        let attempted = resources.len();
        let failures: Vec<RuntimeError> = resources
            .iter()
            .filter_map(|r| {
                let result = runtime.purge(&r.id);
                if let Err(e) = &result {
                    error!("Could not purge {} container {}: {}", r.dialect, r.name, e);
                }
                result.err()
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CleanupError {
                attempted,
                failures,
            })
        }
    }

    /// Purge a single container and stop tracking it.
    ///
    /// The entry is dropped from the registry even if the purge fails, so a
    /// later [`ResourceRegistry::purge_all`] does not report it twice.
    pub fn purge(&self, runtime: &dyn ContainerRuntime, id: &str) -> Result<(), RuntimeError> {
        self.lock().retain(|r| r.id != id);
        runtime.purge(id)
    }

    /// Guard that purges this registry when dropped.
    pub fn exit_guard(&self) -> ExitGuard<'_> {
        ExitGuard {
            registry: self,
            runtime: None,
            strict: true,
            finished: false,
        }
    }
}

/// Purge every container in `registry` using a fresh docker handle.
pub fn kill_all_test_databases(registry: &ResourceRegistry) -> Result<(), TestDbError> {
    if registry.is_empty() {
        return Ok(());
    }
    let runtime = DockerCli::connect()?;
    registry.purge_all(&runtime)?;
    Ok(())
}

/// Purges a [`ResourceRegistry`] when the test scope ends.
///
/// A failed purge panics on drop unless [`ExitGuard::lenient`] was set,
/// since leaked containers outlive the test process. Call
/// [`ExitGuard::finish`] to handle the error yourself.
pub struct ExitGuard<'a> {
    registry: &'a ResourceRegistry,
    runtime: Option<&'a dyn ContainerRuntime>,
    strict: bool,
    finished: bool,
}

impl<'a> ExitGuard<'a> {
    /// Purge through `runtime` instead of a fresh docker handle.
    pub fn with_runtime(mut self, runtime: &'a dyn ContainerRuntime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Log purge failures on drop instead of panicking.
    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }

    /// Purge now and return the outcome.
    pub fn finish(mut self) -> Result<(), TestDbError> {
        self.finished = true;
        self.purge()
    }

    fn purge(&self) -> Result<(), TestDbError> {
        match self.runtime {
            Some(runtime) => Ok(self.registry.purge_all(runtime)?),
            None => kill_all_test_databases(self.registry),
        }
    }
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let Err(e) = self.purge() else {
            return;
        };

        if !self.strict {
            warn!("Test container cleanup failed: {}", e);
        } else if std::thread::panicking() {
            // Panicking again would abort without the original message.
            error!("Test container cleanup failed during unwind: {}", e);
        } else {
            error!("Test container cleanup failed: {}", e);
            panic!("Test container cleanup failed: {e}");
        }
    }
}
