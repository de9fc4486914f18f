//! Concurrency probe and query benchmarks against a migrated destination

mod common;

use common::TestDestination;
use common::fixtures::seed_source;
use data::db::migration::performance::BenchmarkOperation;
use data::db::{
    ConcurrencyProber, DataExporter, DataImporter, PerformanceBenchmarker, SchemaManager, SourceDb,
};
use std::time::Duration;
use tempfile::TempDir;

/// Generous enough that a shared CI server never trips them
const RELAXED_THRESHOLD: Duration = Duration::from_secs(10);

async fn migrated_destination() -> Option<(TestDestination, TempDir)> {
    let destination = TestDestination::create().await?;
    let temp_dir = TempDir::new().unwrap();
    let source_path = temp_dir.path().join("packages.db");
    drop(seed_source(&source_path));

    let data = DataExporter::new(SourceDb::open(&source_path).unwrap())
        .export_all()
        .await
        .unwrap();
    let mut client = destination.client().await;
    SchemaManager::new().create_schema(&mut client).await.unwrap();
    DataImporter::default()
        .import_all(&mut client, &data)
        .await
        .unwrap();

    Some((destination, temp_dir))
}

#[tokio::test]
async fn test_concurrency_probe_opens_every_connection() {
    let Some((destination, _temp_dir)) = migrated_destination().await else {
        return;
    };
    let pool = destination.pool();

    let result = ConcurrencyProber::new(RELAXED_THRESHOLD, RELAXED_THRESHOLD)
        .probe(pool.config(), &pool, 4)
        .await;
    pool.close();

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.connections.len(), 4);
    assert_eq!(result.queries.len(), 4);
    assert_eq!(result.connection_success_rate(), 1.0);
    assert_eq!(result.query_success_rate(), 1.0);

    destination.teardown().await;
}

#[tokio::test]
async fn test_benchmark_runs_all_operations() {
    let Some((destination, _temp_dir)) = migrated_destination().await else {
        return;
    };
    let pool = destination.pool();

    let result = PerformanceBenchmarker::new(RELAXED_THRESHOLD)
        .benchmark(&pool)
        .await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.operations.len(), 4);
    for operation in [
        BenchmarkOperation::SimpleSelect,
        BenchmarkOperation::ComplexJoin,
        BenchmarkOperation::IndexedLookup,
        BenchmarkOperation::BulkInsert,
    ] {
        assert!(result.timing(operation).unwrap().success, "{:?} failed", operation);
    }
    assert!(result.metrics.read_count >= 3);

    // The scratch table is gone afterwards
    let tables = destination.table_names().await;
    assert!(tables.iter().all(|t| !t.starts_with("benchmark_scratch_")));
    pool.close();

    destination.teardown().await;
}

#[tokio::test]
async fn test_probe_against_unreachable_destination_fails() {
    let config = data::db::DatabaseConfig::new("postgres://app:pw@127.0.0.1:1/tracker")
        .with_connect_timeout(Duration::from_millis(200));
    let pool = data::db::DestinationPool::new(config).unwrap();

    let result = ConcurrencyProber::default().probe(pool.config(), &pool, 2).await;
    assert!(!result.success);
    assert_eq!(result.connection_success_rate(), 0.0);
    assert!(!result.errors.is_empty());
}
