//! Disposable test databases.
//!
//! Starts PostgreSQL, MySQL and CockroachDB containers through the Docker
//! CLI, waits until they answer queries, and purges them when the test run
//! is over. Each dialect has an environment variable that points the helpers
//! at an existing database instead:
//!
//! | Dialect     | Override variable            |
//! |-------------|------------------------------|
//! | PostgreSQL  | `TEST_DATABASE_POSTGRESQL`   |
//! | MySQL       | `TEST_DATABASE_MYSQL`        |
//! | CockroachDB | `TEST_DATABASE_COCKROACHDB`  |
//!
//! # Features
//!
//! - `docker-tests`: Enable tests that require a running Docker daemon
//!
//! # Usage
//!
//! ```rust,ignore
//! use testdb::{Dialect, DockerCli, ResourceRegistry, run_for_test, connect, RetryPolicy};
//!
//! #[tokio::test]
//! async fn test_against_postgres() {
//!     let registry = ResourceRegistry::new();
//!     let _guard = registry.exit_guard();
//!     let runtime = DockerCli::new();
//!
//!     let dsn = run_for_test(Dialect::Postgres, &runtime, &registry);
//!     let db = connect(Dialect::Postgres, &dsn, &RetryPolicy::default()).await.unwrap();
//!     // ...
//!     // Containers are purged when the guard drops
//! }
//! ```

pub mod bootstrap;
pub mod cancel;
pub mod config;
pub mod dsn;
pub mod error;
pub mod parallel;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod runtime;

// Re-exports for convenience
pub use bootstrap::{bootstrap, connect, DbHandle};
pub use cancel::CancellationToken;
pub use config::{Dialect, Overrides};
pub use dsn::{normalize, ConnectionDescriptor, NormalizedDsn};
pub use error::{CleanupError, Result, RuntimeError, TestDbError};
pub use parallel::{parallel, Task};
pub use registry::{kill_all_test_databases, ExitGuard, Resource, ResourceRegistry};
pub use resolver::{
    connect_for_test, connect_for_test_with, connect_to_test, connect_to_test_with, run,
    run_for_test, run_for_test_with,
};
pub use retry::{retry, RetryError, RetryPolicy};
pub use runtime::{ContainerRuntime, ContainerSpec, DockerCli};

#[doc(hidden)]
pub use paste;

/// Generate one docker-backed test per dialect.
///
/// The body receives the DSN returned by [`run_for_test`] and a connected
/// [`DbHandle`]. Generated tests only compile with the `docker-tests`
/// feature of the calling crate.
///
/// # Example
///
/// ```rust,ignore
/// testdb::test_all_dialects!(select_one, |dsn, db| async move {
///     db.execute("SELECT 1").await.unwrap();
/// });
/// ```
#[macro_export]
macro_rules! test_all_dialects {
    (@body $dialect:expr, $dsn:ident, $db:ident, $body:expr) => {{
        let registry = $crate::ResourceRegistry::new();
        let _guard = registry.exit_guard();
        let runtime = $crate::DockerCli::new();
        let $dsn = $crate::run_for_test($dialect, &runtime, &registry);
        let $db = $crate::connect($dialect, &$dsn, &$crate::RetryPolicy::default())
            .await
            .unwrap();
        $body.await;
    }};
    ($name:ident, |$dsn:ident, $db:ident| $body:expr) => {
        $crate::paste::paste! {
            #[tokio::test]
            #[cfg(feature = "docker-tests")]
            async fn [<$name _postgres>]() {
                $crate::test_all_dialects!(@body $crate::Dialect::Postgres, $dsn, $db, $body);
            }

            #[tokio::test]
            #[cfg(feature = "docker-tests")]
            async fn [<$name _mysql>]() {
                $crate::test_all_dialects!(@body $crate::Dialect::MySql, $dsn, $db, $body);
            }

            #[tokio::test]
            #[cfg(feature = "docker-tests")]
            async fn [<$name _cockroach>]() {
                $crate::test_all_dialects!(@body $crate::Dialect::Cockroach, $dsn, $db, $body);
            }
        }
    };
}
