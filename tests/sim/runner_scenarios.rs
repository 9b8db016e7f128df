//! Start-up sequencing and cleanup of the runner.

use crate::fakes::{sharded_topology, standalone_topology, BackendCall, FakeBackend, FakeShardAdmin};
use bson::doc;
use keyhole_sim::config::{EXAMPLES_COLLECTION, KEYHOLE_DB};
use keyhole_sim::metrics::POPULATE_CATEGORY;
use keyhole_sim::runner::cleanup;
use keyhole_sim::template::TransactionTemplate;
use keyhole_sim::termination::ShutdownState;
use keyhole_sim::{RunConfig, Runner, StartOutcome};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

const ENTRY: &str = "mongodb://localhost:27017";

fn config(output_dir: &TempDir) -> RunConfig {
    let mut config = RunConfig::new(ENTRY);
    config.connections = 1;
    config.duration_minutes = 2;
    config.auto_confirm = true;
    config.output_dir = output_dir.path().to_path_buf();
    config
}

fn default_template() -> TransactionTemplate {
    TransactionTemplate::load_or_default(None).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_simulate_only_runs_every_worker_for_the_full_duration() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.connections = 2;
    config.duration_minutes = 3;
    config.simulate_only = true;
    let backend = Arc::new(FakeBackend::new());
    let runner = Runner::new(
        config,
        standalone_topology(ENTRY),
        backend.clone(),
        None,
        default_template(),
    );
    runner.coordinator().disable_exit();

    let outcome = runner.start(std::io::empty()).await.unwrap();
    assert_eq!(outcome, StartOutcome::Started { workers: 2 });

    tokio::time::sleep(Duration::from_secs(3 * 60 + 5)).await;

    assert_eq!(backend.sessions(), 2);
    assert!(!backend
        .calls()
        .iter()
        .any(|call| matches!(call, BackendCall::CreateIndexes(_))));
    assert_eq!(runner.metrics().count(POPULATE_CATEGORY).await, 0);

    let executions = backend.executions();
    for worker in 0..2 {
        let last = executions
            .iter()
            .filter(|(w, _)| *w == worker)
            .map(|(_, at)| *at)
            .max()
            .unwrap();
        assert!(last >= Duration::from_secs(179), "worker {worker} stopped at {last:?}");
        assert!(last <= Duration::from_secs(181), "worker {worker} ran until {last:?}");
    }

    // Nothing runs after the plan ends.
    let done = executions.len();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(backend.executions().len(), done);
}

#[tokio::test(start_paused = true)]
async fn test_drop_then_indexes_then_workers() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.drop_first = true;
    let backend = Arc::new(FakeBackend::new());
    let runner = Runner::new(
        config,
        standalone_topology(ENTRY),
        backend.clone(),
        None,
        default_template(),
    );
    runner.coordinator().disable_exit();

    runner.start(std::io::empty()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let calls = backend.calls();
    assert_eq!(
        calls[..4],
        [
            BackendCall::DropCollection(KEYHOLE_DB.to_string(), EXAMPLES_COLLECTION.to_string()),
            BackendCall::DropDatabase(KEYHOLE_DB.to_string()),
            BackendCall::CreateIndexes(vec![doc! { "_search": 1 }, doc! { "email": 1 }]),
            BackendCall::OpenSession(0),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_population_runs_before_simulation() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let runner = Runner::new(
        config(&dir),
        standalone_topology(ENTRY),
        backend.clone(),
        None,
        default_template(),
    );
    runner.coordinator().disable_exit();

    runner.start(std::io::empty()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2 * 60 + 5)).await;

    assert!(runner.metrics().count(POPULATE_CATEGORY).await > 0);
    let first_operation = backend
        .executions()
        .iter()
        .map(|(_, at)| *at)
        .min()
        .unwrap();
    assert!(first_operation >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_sharded_start_partitions_on_email() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let admin = Arc::new(FakeShardAdmin::new("shard00", 3));
    let runner = Runner::new(
        config(&dir),
        sharded_topology("mongodb://mongos.example.net:27017", 4),
        backend.clone(),
        Some(admin.clone()),
        default_template(),
    );
    runner.coordinator().disable_exit();

    runner.start(std::io::empty()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(admin.splits(), vec!["H", "O", "V"]);
    assert_eq!(backend.sessions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_custom_indexes_skip_partitioning() {
    let dir = TempDir::new().unwrap();
    let template_path = dir.path().join("tx.yaml");
    std::fs::write(
        &template_path,
        "indexes:\n  - { lastName: 1 }\ntransactions:\n  - c: insert\n",
    )
    .unwrap();
    let backend = Arc::new(FakeBackend::new());
    let admin = Arc::new(FakeShardAdmin::new("shard00", 3));
    let runner = Runner::new(
        config(&dir),
        sharded_topology("mongodb://mongos.example.net:27017", 4),
        backend.clone(),
        Some(admin.clone()),
        TransactionTemplate::load(&template_path).unwrap(),
    );
    runner.coordinator().disable_exit();

    runner.start(std::io::empty()).await.unwrap();

    assert!(admin.calls().is_empty());
    assert!(backend.calls().contains(&BackendCall::CreateIndexes(vec![
        doc! { "_search": 1 },
        doc! { "lastName": 1 },
    ])));
}

#[tokio::test(start_paused = true)]
async fn test_declined_confirmation_starts_nothing() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.auto_confirm = false;
    config.drop_first = true;
    let backend = Arc::new(FakeBackend::new());
    let runner = Runner::new(
        config,
        standalone_topology(ENTRY),
        backend.clone(),
        None,
        default_template(),
    );
    runner.coordinator().disable_exit();

    let outcome = runner.start(Cursor::new("n\n")).await.unwrap();

    assert_eq!(outcome, StartOutcome::Declined);
    assert!(backend.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_peek_collects_status_until_deadline() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.peek = true;
    config.duration_minutes = 1;
    let backend = Arc::new(FakeBackend::new());
    let mut runner = Runner::new(
        config,
        standalone_topology(ENTRY),
        backend.clone(),
        None,
        default_template(),
    );
    runner.coordinator().disable_exit();
    assert!(runner.has_peek_deadline());

    let outcome = runner.start(std::io::empty()).await.unwrap();
    assert_eq!(outcome, StartOutcome::Peeking);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(runner.coordinator().state(), ShutdownState::Running);

    // The deadline wins over the run timer started later.
    assert!(runner.wait_for_termination().await.is_none());
    assert_eq!(runner.coordinator().state(), ShutdownState::Exited);
    assert_eq!(
        backend.calls(),
        vec![BackendCall::DumpStatus(ENTRY.to_string())]
    );
    let written = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(written, 2);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_drops_collection_then_database() {
    let dir = TempDir::new().unwrap();
    let backend = FakeBackend::new();
    let started = Instant::now();

    cleanup(&backend, &config(&dir)).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(
        backend.calls(),
        vec![
            BackendCall::DropCollection(KEYHOLE_DB.to_string(), EXAMPLES_COLLECTION.to_string()),
            BackendCall::DropDatabase(KEYHOLE_DB.to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_keeps_custom_collection_and_user_database() {
    let dir = TempDir::new().unwrap();

    let backend = FakeBackend::new();
    let mut custom = config(&dir);
    custom.collection = "orders".to_string();
    cleanup(&backend, &custom).await.unwrap();
    assert_eq!(
        backend.calls(),
        vec![BackendCall::DropDatabase(KEYHOLE_DB.to_string())]
    );

    let backend = FakeBackend::new();
    let mut user_db = config(&dir);
    user_db.connection = user_db.connection.with_uri("mongodb://localhost:27017/shop");
    user_db.database = "shop".to_string();
    let started = Instant::now();
    cleanup(&backend, &user_db).await.unwrap();
    assert!(backend.calls().is_empty());
    assert!(started.elapsed() >= Duration::from_secs(1));

    let backend = FakeBackend::new();
    let mut simulate_only = config(&dir);
    simulate_only.simulate_only = true;
    cleanup(&backend, &simulate_only).await.unwrap();
    assert!(backend.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_in_peek_mode_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let backend = FakeBackend::new();
    let mut peek = config(&dir);
    peek.drop_first = true;
    peek.peek = true;
    let started = Instant::now();

    cleanup(&backend, &peek).await.unwrap();

    assert!(backend.calls().is_empty());
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_attempts_every_drop_and_reports_failure() {
    let dir = TempDir::new().unwrap();
    let backend = FakeBackend::failing_drops();

    let result = cleanup(&backend, &config(&dir)).await;

    assert!(result.is_err());
    assert_eq!(backend.calls().len(), 2);
}
