//! Start-or-reuse entry points, one call per dialect.
//!
//! Every helper first checks the dialect's override variable
//! (`TEST_DATABASE_POSTGRESQL`, `TEST_DATABASE_MYSQL`,
//! `TEST_DATABASE_COCKROACHDB`). When it is set, no container is started and
//! the given DSN is used as is.

use crate::bootstrap::{bootstrap, connect, DbHandle};
use crate::config::{Dialect, Overrides};
use crate::error::Result;
use crate::registry::{Resource, ResourceRegistry};
use crate::retry::RetryPolicy;
use crate::runtime::{ContainerRuntime, ContainerSpec};
use tracing::{error, info};

/// Start a container for `dialect`, register it and return its connection URL.
///
/// The URL comes from [`Dialect::url_template`] with the published host port
/// filled in. The database may not accept connections yet; use
/// [`connect`] to wait for it.
pub fn run(
    dialect: Dialect,
    runtime: &dyn ContainerRuntime,
    registry: &ResourceRegistry,
) -> Result<String> {
    let resource = start(dialect, runtime, registry)?;
    Ok(dialect.url_for_port(resource.host_port))
}

fn start(
    dialect: Dialect,
    runtime: &dyn ContainerRuntime,
    registry: &ResourceRegistry,
) -> Result<Resource> {
    runtime.ping()?;

    let spec = ContainerSpec::for_dialect(dialect);
    let id = runtime.run(&spec)?;

    let host_port = match runtime.host_port(&id, dialect.container_port()) {
        Ok(port) => port,
        Err(e) => {
            if let Err(purge) = runtime.purge(&id) {
                error!("Could not remove container {} after failed start: {}", spec.name, purge);
            }
            return Err(e.into());
        }
    };

    let resource = Resource {
        id,
        name: spec.name,
        dialect,
        host_port,
    };
    registry.register(resource.clone());
    Ok(resource)
}

/// [`run`], unless the dialect's override variable is set.
///
/// # Panics
///
/// Panics if the container cannot be provisioned, failing the calling test.
pub fn run_for_test(
    dialect: Dialect,
    runtime: &dyn ContainerRuntime,
    registry: &ResourceRegistry,
) -> String {
    run_for_test_with(dialect, &Overrides::from_env(), runtime, registry)
}

/// [`run_for_test`] with explicitly supplied overrides.
pub fn run_for_test_with(
    dialect: Dialect,
    overrides: &Overrides,
    runtime: &dyn ContainerRuntime,
    registry: &ResourceRegistry,
) -> String {
    if let Some(dsn) = overrides.get(dialect) {
        info!(
            "Skipping Docker setup because environment variable {} is set to: {}",
            dialect.override_var(),
            dsn
        );
        return dsn.to_string();
    }

    match run(dialect, runtime, registry) {
        Ok(url) => url,
        Err(e) => panic!("Could not provision {dialect} test database: {e}"),
    }
}

/// Connect to the dialect's test database, starting a container if needed.
///
/// With an override set this is [`connect`] on the override DSN. Otherwise
/// a container is started and [`bootstrap`]ped, which purges it again if it
/// never becomes ready.
pub async fn connect_to_test(
    dialect: Dialect,
    runtime: &dyn ContainerRuntime,
    registry: &ResourceRegistry,
    policy: &RetryPolicy,
) -> Result<DbHandle> {
    connect_to_test_with(dialect, &Overrides::from_env(), runtime, registry, policy).await
}

/// [`connect_to_test`] with explicitly supplied overrides.
pub async fn connect_to_test_with(
    dialect: Dialect,
    overrides: &Overrides,
    runtime: &dyn ContainerRuntime,
    registry: &ResourceRegistry,
    policy: &RetryPolicy,
) -> Result<DbHandle> {
    if let Some(dsn) = overrides.get(dialect) {
        info!(
            "Found {} test database config in {}, skipping Docker setup",
            dialect,
            dialect.override_var()
        );
        return connect(dialect, dsn, policy).await;
    }

    let resource = start(dialect, runtime, registry)?;
    bootstrap(
        runtime,
        registry,
        &resource,
        dialect.url_template(),
        dialect.container_port(),
        policy,
    )
    .await
}

/// [`connect_to_test`], panicking on failure.
///
/// A container that never becomes ready within `policy` is purged before
/// the panic.
///
/// # Panics
///
/// Panics if provisioning or connecting fails.
pub async fn connect_for_test(
    dialect: Dialect,
    runtime: &dyn ContainerRuntime,
    registry: &ResourceRegistry,
    policy: &RetryPolicy,
) -> DbHandle {
    connect_for_test_with(dialect, &Overrides::from_env(), runtime, registry, policy).await
}

/// [`connect_for_test`] with explicitly supplied overrides.
pub async fn connect_for_test_with(
    dialect: Dialect,
    overrides: &Overrides,
    runtime: &dyn ContainerRuntime,
    registry: &ResourceRegistry,
    policy: &RetryPolicy,
) -> DbHandle {
    match connect_to_test_with(dialect, overrides, runtime, registry, policy).await {
        Ok(db) => db,
        Err(e) => panic!("Could not connect to {dialect} test database: {e}"),
    }
}
