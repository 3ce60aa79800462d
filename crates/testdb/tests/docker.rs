//! Tests against real containers.
//!
//! These need a running Docker daemon and pull the database images.
//!
//! Run with:
//!   cargo test -p testdb --features docker-tests

#![cfg(feature = "docker-tests")]

use std::sync::Mutex;
use testdb::{
    connect, connect_to_test, parallel, run, Dialect, DockerCli, ResourceRegistry, RetryPolicy,
    Task,
};

testdb::test_all_dialects!(test_select_version, |dsn, db| async move {
    assert!(!dsn.is_empty());
    let version = db.server_version().await.unwrap();
    assert!(!version.is_empty());
});

/// Provision every dialect at once, then connect to each.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parallel_provisioning() {
    testdb_logging::init_test_logging();

    let registry = ResourceRegistry::new();
    let guard = registry.exit_guard();
    let runtime = DockerCli::connect().unwrap();
    let urls = Mutex::new(Vec::new());

    let tasks: Vec<Task<'_>> = Dialect::all()
        .iter()
        .map(|&dialect| {
            let (runtime, registry, urls) = (&runtime, &registry, &urls);
            Box::new(move || {
                let url = run(dialect, runtime, registry).unwrap();
                urls.lock().unwrap().push((dialect, url));
            }) as Task<'_>
        })
        .collect();
    parallel(tasks);

    assert_eq!(registry.len(), 3);

    let urls = urls.into_inner().unwrap();
    for (dialect, url) in &urls {
        let db = connect(*dialect, url, &RetryPolicy::default()).await.unwrap();
        db.execute("SELECT 1").await.unwrap();
        db.close().await;
    }

    guard.finish().unwrap();
    assert!(registry.is_empty());
}

/// The container bootstrap path for MySQL.
#[tokio::test]
async fn test_connect_to_test_mysql() {
    testdb_logging::init_test_logging();

    let registry = ResourceRegistry::new();
    let runtime = DockerCli::connect().unwrap();
    let _guard = registry.exit_guard().with_runtime(&runtime);

    let db = connect_to_test(Dialect::MySql, &runtime, &registry, &RetryPolicy::default())
        .await
        .unwrap();

    let pool = db.as_mysql().unwrap();
    let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(pool).await.unwrap();
    assert_eq!(one, 1);
}
