//! Integration tests for the migration pipeline against a real PostgreSQL
//!
//! Every test returns early when `TEST_DATABASE_URL` is unset.

mod common;

use common::TestDestination;
use common::fixtures::{package, seed_source, status_update};
use data::db::{
    DataExporter, DataImporter, DatabaseError, ErrorKind, ExportedData, IntegrityVerifier,
    MigrationConfig, MigrationExecutor, MigrationPhase, MigrationReport, Orchestrator,
    OrchestratorConfig, RecordCounts, RetryPolicy, SchemaManager, SourceDb,
};
use data::model::PackageStatus;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn export(path: &Path) -> ExportedData {
    DataExporter::new(SourceDb::open(path).unwrap())
        .export_all_blocking()
        .unwrap()
}

fn migration_config(temp_dir: &TempDir) -> MigrationConfig {
    MigrationConfig::new(temp_dir.path().join("packages.db"))
        .with_backup_dir(temp_dir.path().join("backups"))
        .with_report_dir(temp_dir.path().join("reports"))
        .with_retry(RetryPolicy::none())
}

#[tokio::test]
async fn test_schema_creation_is_idempotent() {
    let Some(destination) = TestDestination::create().await else {
        return;
    };
    let mut client = destination.client().await;
    let schema = SchemaManager::new();

    let first = schema.create_schema(&mut client).await.unwrap();
    assert!(first.is_complete());
    assert!(!first.already_present);

    let second = schema.create_schema(&mut client).await.unwrap();
    assert!(second.is_complete());
    assert!(second.already_present);
    assert_eq!(first.tables, second.tables);

    destination.teardown().await;
}

#[tokio::test]
async fn test_reimport_converges_to_source() {
    let Some(destination) = TestDestination::create().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();
    let source_path = temp_dir.path().join("packages.db");
    drop(seed_source(&source_path));
    let mut data = export(&source_path);

    let mut client = destination.client().await;
    SchemaManager::new().create_schema(&mut client).await.unwrap();
    let importer = DataImporter::new(2);

    let first = importer.import_all(&mut client, &data).await.unwrap();
    assert_eq!(first.as_record_counts(), RecordCounts::new(5, 12, 3));

    data.packages[0].status = PackageStatus::Delivered;
    let second = importer.import_all(&mut client, &data).await.unwrap();
    assert_eq!(second.as_record_counts(), RecordCounts::new(5, 12, 3));

    assert_eq!(destination.count("packages").await, 5);
    assert_eq!(destination.count("status_updates").await, 12);
    assert_eq!(destination.count("contact_submissions").await, 3);

    let status: String = client
        .query_one(
            "SELECT status FROM packages WHERE id = $1",
            &[&data.packages[0].id],
        )
        .await
        .unwrap()
        .get(0);
    assert_eq!(status, "delivered");

    destination.teardown().await;
}

#[tokio::test]
async fn test_import_is_all_or_nothing() {
    let Some(destination) = TestDestination::create().await else {
        return;
    };
    let mut client = destination.client().await;
    SchemaManager::new().create_schema(&mut client).await.unwrap();

    let data = ExportedData {
        packages: vec![package(0), package(1)],
        status_updates: vec![status_update("pkg-000", 0), status_update("pkg-missing", 1)],
        contact_submissions: Vec::new(),
    };

    let err = DataImporter::default()
        .import_all(&mut client, &data)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::ForeignKeyViolation { .. }));
    assert_eq!(err.kind(), ErrorKind::Import);

    assert_eq!(destination.count("packages").await, 0);
    assert_eq!(destination.count("status_updates").await, 0);

    destination.teardown().await;
}

#[tokio::test]
async fn test_duplicate_tracking_number_is_unique_violation() {
    let Some(destination) = TestDestination::create().await else {
        return;
    };
    let mut client = destination.client().await;
    SchemaManager::new().create_schema(&mut client).await.unwrap();

    let mut duplicate = package(1);
    duplicate.tracking_number = package(0).tracking_number;
    let data = ExportedData {
        packages: vec![package(0), duplicate],
        ..Default::default()
    };

    let err = DataImporter::default()
        .import_all(&mut client, &data)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::UniqueViolation { .. }));
    assert_eq!(err.kind(), ErrorKind::Import);
    assert_eq!(destination.count("packages").await, 0);

    destination.teardown().await;
}

#[tokio::test]
async fn test_full_orchestration_succeeds() {
    let Some(destination) = TestDestination::create().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();
    drop(seed_source(&temp_dir.path().join("packages.db")));

    let orchestrator = Orchestrator::new(
        migration_config(&temp_dir),
        OrchestratorConfig {
            skip_api_tests: true,
            skip_performance_tests: true,
            ..Default::default()
        },
    );
    let report = orchestrator.run(destination.config.clone()).await;

    assert!(report.success, "report errors: {:?}", report.errors);
    assert!(!report.rolled_back);
    let execution = report.execution.as_ref().unwrap();
    assert_eq!(execution.state, MigrationPhase::Succeeded);
    assert_eq!(
        execution.counts.as_ref().unwrap().as_record_counts(),
        RecordCounts::new(5, 12, 3)
    );
    assert!(execution.backup.as_ref().unwrap().backup_path.exists());

    let verification = report.verification.as_ref().unwrap();
    assert!(verification.success);
    assert!(verification.counts_match());
    assert_eq!(verification.orphaned_records(), 0);
    assert_eq!(verification.samples.len(), 5);
    assert!(report.concurrency.is_none());
    assert!(report.api.is_none());

    destination.teardown().await;
}

#[tokio::test]
async fn test_verifier_detects_orphaned_status_update() {
    let Some(destination) = TestDestination::create().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();
    let source_path = temp_dir.path().join("packages.db");
    drop(seed_source(&source_path));
    let data = export(&source_path);

    let mut client = destination.client().await;
    SchemaManager::new().create_schema(&mut client).await.unwrap();
    DataImporter::default()
        .import_all(&mut client, &data)
        .await
        .unwrap();

    client
        .batch_execute(
            "ALTER TABLE status_updates DROP CONSTRAINT status_updates_package_id_fkey;
             INSERT INTO status_updates (id, package_id, status, location, timestamp)
             VALUES ('orphan-1', 'pkg-gone', 'in_transit', 'Nowhere', NOW())",
        )
        .await
        .unwrap();

    let result = IntegrityVerifier::new().verify(&client, &data).await;
    assert!(!result.success);
    assert_eq!(result.orphaned_records(), 1);
    assert!(!result.foreign_key_integrity.valid);
    assert!(!result.counts_match());

    destination.teardown().await;
}

#[tokio::test]
async fn test_dry_run_leaves_both_databases_untouched() {
    let Some(destination) = TestDestination::create().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();
    let source_path = temp_dir.path().join("packages.db");
    drop(seed_source(&source_path));
    let before = fs::read(&source_path).unwrap();

    let phases = Arc::new(Mutex::new(Vec::new()));
    let recorded = phases.clone();
    let pool = destination.pool();
    let result = MigrationExecutor::new(migration_config(&temp_dir).with_dry_run(true))
        .with_progress(Arc::new(move |phase, percent| {
            recorded.lock().unwrap().push((phase, percent));
        }))
        .execute(&pool)
        .await;
    pool.close();

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.state, MigrationPhase::Succeeded);
    assert_eq!(result.dry_run_counts, Some(RecordCounts::new(5, 12, 3)));
    assert!(result.backup.is_none());
    assert!(result.counts.is_none());

    assert!(destination.table_names().await.is_empty());
    assert_eq!(fs::read(&source_path).unwrap(), before);
    assert!(!temp_dir.path().join("backups").exists());

    let phases = phases.lock().unwrap();
    assert_eq!(phases.last(), Some(&(MigrationPhase::Succeeded, 100)));
    assert!(!phases.iter().any(|(p, _)| *p == MigrationPhase::MigratingData));

    destination.teardown().await;
}

#[tokio::test]
async fn test_failed_import_rolls_back_destination_and_source() {
    let Some(destination) = TestDestination::create().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();
    let source_path = temp_dir.path().join("packages.db");
    drop(seed_source(&source_path));
    let before = fs::read(&source_path).unwrap();

    // A pre-existing row that collides on tracking number with the first
    // source package under a different id
    let mut client = destination.client().await;
    SchemaManager::new().create_schema(&mut client).await.unwrap();
    let mut conflicting = package(0);
    conflicting.id = "pkg-preexisting".to_string();
    DataImporter::default()
        .import_all(
            &mut client,
            &ExportedData {
                packages: vec![conflicting],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let pool = destination.pool();
    let result = MigrationExecutor::new(migration_config(&temp_dir))
        .execute(&pool)
        .await;
    pool.close();

    assert!(!result.success);
    assert_eq!(result.failed_phase, Some(MigrationPhase::MigratingData));
    assert_eq!(result.state, MigrationPhase::RolledBack);
    assert!(result.rolled_back());
    assert_eq!(result.blocking_error.as_ref().unwrap().kind, ErrorKind::Import);

    let rollback = result.rollback.as_ref().unwrap();
    assert!(rollback.success);
    assert!(rollback.tables_dropped);
    assert_eq!(rollback.backup_restored, Some(true));

    assert!(destination.table_names().await.is_empty());
    assert_eq!(fs::read(&source_path).unwrap(), before);

    destination.teardown().await;
}

/// Migrates the seeded source, then verifies against a snapshot holding one
/// package the destination never received
async fn verify_against_diverged_snapshot(
    destination: &TestDestination,
    temp_dir: &TempDir,
    auto_rollback: bool,
) -> MigrationReport {
    let source_path = temp_dir.path().join("packages.db");
    drop(seed_source(&source_path));

    let config = migration_config(temp_dir).with_auto_rollback(auto_rollback);
    let pool = destination.pool();
    let execution = MigrationExecutor::new(config.clone()).execute(&pool).await;
    assert!(execution.success, "errors: {:?}", execution.errors);

    let mut snapshot = export(&source_path);
    snapshot.packages.push(package(99));

    let orchestrator = Orchestrator::new(
        config,
        OrchestratorConfig {
            skip_api_tests: true,
            skip_performance_tests: true,
            ..Default::default()
        },
    );
    let mut report = MigrationReport::new("orchestrate", false);
    orchestrator
        .verify_and_roll_back(&pool, &snapshot, execution.backup.as_ref(), &mut report)
        .await;
    pool.close();
    report
}

#[tokio::test]
async fn test_failed_verification_rolls_back_destination() {
    let Some(destination) = TestDestination::create().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();

    let report = verify_against_diverged_snapshot(&destination, &temp_dir, true).await;

    let verification = report.verification.as_ref().unwrap();
    assert!(!verification.success);
    assert!(!verification.counts_match());

    let rollback = report.rollback.as_ref().unwrap();
    assert!(rollback.success);
    assert!(rollback.tables_dropped);
    assert!(report.rolled_back);
    assert!(destination.table_names().await.is_empty());

    destination.teardown().await;
}

#[tokio::test]
async fn test_failed_verification_without_auto_rollback_keeps_destination() {
    let Some(destination) = TestDestination::create().await else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();

    let report = verify_against_diverged_snapshot(&destination, &temp_dir, false).await;

    assert!(!report.verification.as_ref().unwrap().success);
    assert!(report.rollback.is_none());
    assert!(!report.rolled_back);
    assert_eq!(destination.count("packages").await, 5);
    assert_eq!(destination.count("status_updates").await, 12);

    destination.teardown().await;
}
