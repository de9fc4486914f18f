//! Full migration run: executor, then verification, probes and benchmarks
//!
//! The orchestrator owns the destination pool for exactly one run and
//! closes it before returning. It always produces a report, whatever failed.

use super::api::{ApiResult, ApiSmokeTester};
use super::backup::{BackupManager, BackupMetadata};
use super::concurrency::{
    ConcurrencyProber, DEFAULT_CONCURRENCY, DEFAULT_CONNECTION_THRESHOLD, DEFAULT_QUERY_THRESHOLD,
};
use super::executor::MigrationExecutor;
use super::export::{DataExporter, ExportedData};
use super::performance::{DEFAULT_BENCHMARK_THRESHOLD, PerformanceBenchmarker};
use super::progress::{ProgressCallback, log_progress};
use super::report::MigrationReport;
use super::rollback::RollbackManager;
use super::verification::{IntegrityVerifier, VerificationResult};
use super::MigrationConfig;
use crate::db::{DatabaseConfig, DatabaseError, DestinationPool, SourceDb};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub skip_verification: bool,
    pub skip_api_tests: bool,
    pub skip_performance_tests: bool,
    pub concurrent_connections: usize,
    pub connection_threshold: Duration,
    pub query_threshold: Duration,
    pub benchmark_threshold: Duration,
    /// Deployment to smoke-test; API checks are skipped without one
    pub api_base_url: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            skip_verification: false,
            skip_api_tests: false,
            skip_performance_tests: false,
            concurrent_connections: DEFAULT_CONCURRENCY,
            connection_threshold: DEFAULT_CONNECTION_THRESHOLD,
            query_threshold: DEFAULT_QUERY_THRESHOLD,
            benchmark_threshold: DEFAULT_BENCHMARK_THRESHOLD,
            api_base_url: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_concurrent_connections(mut self, connections: usize) -> Self {
        self.concurrent_connections = connections.max(1);
        self
    }

    pub fn with_api_base_url(mut self, url: Option<String>) -> Self {
        self.api_base_url = url.filter(|u| !u.trim().is_empty());
        self
    }
}

pub struct Orchestrator {
    migration: MigrationConfig,
    config: OrchestratorConfig,
    progress: ProgressCallback,
}

impl Orchestrator {
    pub fn new(migration: MigrationConfig, config: OrchestratorConfig) -> Self {
        Self {
            migration,
            config,
            progress: log_progress(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Executor only, on a pool scoped to this call
    pub async fn migrate(&self, db_config: DatabaseConfig) -> MigrationReport {
        let started = Instant::now();
        let mut report = MigrationReport::new("migrate", self.migration.dry_run);

        match DestinationPool::new(db_config) {
            Ok(pool) => {
                let execution = MigrationExecutor::new(self.migration.clone())
                    .with_progress(self.progress.clone())
                    .execute(&pool)
                    .await;
                report.record_execution(execution);
                pool.close();
            }
            Err(e) => report.record_error(&prerequisite(e)),
        }

        report.finish(started);
        report
    }

    /// Executor, then verification, probes, benchmarks and API checks
    pub async fn run(&self, db_config: DatabaseConfig) -> MigrationReport {
        let started = Instant::now();
        let mut report = MigrationReport::new("orchestrate", self.migration.dry_run);

        match DestinationPool::new(db_config) {
            Ok(pool) => {
                self.run_with_pool(&pool, &mut report).await;
                pool.close();
            }
            Err(e) => report.record_error(&prerequisite(e)),
        }

        report.finish(started);
        report
    }

    /// Checks against an already-migrated destination, using the current
    /// source file as the reference snapshot
    pub async fn verify(&self, db_config: DatabaseConfig) -> MigrationReport {
        let started = Instant::now();
        let mut report = MigrationReport::new("verify", false);

        let source = match SourceDb::open(&self.migration.source_path) {
            Ok(source) => source,
            Err(e) => {
                report.record_error(&e);
                report.finish(started);
                return report;
            }
        };
        let snapshot = match DataExporter::new(source).export_all().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                report.record_error(&e);
                report.finish(started);
                return report;
            }
        };

        match DestinationPool::new(db_config) {
            Ok(pool) => {
                self.check_destination(&pool, &snapshot, &mut report).await;
                pool.close();
            }
            Err(e) => report.record_error(&prerequisite(e)),
        }

        report.finish(started);
        report
    }

    pub async fn run_with_pool(&self, pool: &DestinationPool, report: &mut MigrationReport) {
        let mut execution = MigrationExecutor::new(self.migration.clone())
            .with_progress(self.progress.clone())
            .execute(pool)
            .await;
        let snapshot = execution.exported.take();
        let backup = execution.backup.clone();
        let succeeded = execution.success;
        report.record_execution(execution);

        if !succeeded {
            log::error!("Execution failed; skipping verification");
            return;
        }
        if self.migration.dry_run {
            log::info!("Dry run complete; verification not applicable");
            return;
        }
        if self.config.skip_verification {
            log::warn!("Verification skipped by request");
            return;
        }
        let Some(snapshot) = snapshot else {
            report.record_error(&DatabaseError::Verification(
                "no source snapshot available for verification".to_string(),
            ));
            return;
        };

        self.verify_and_roll_back(pool, &snapshot, backup.as_ref(), report)
            .await;
    }

    /// Post-execution checks against `snapshot`; a failed integrity check
    /// drops the destination tables and restores `backup` unless
    /// auto-rollback is off
    pub async fn verify_and_roll_back(
        &self,
        pool: &DestinationPool,
        snapshot: &ExportedData,
        backup: Option<&BackupMetadata>,
        report: &mut MigrationReport,
    ) {
        self.check_destination(pool, snapshot, report).await;

        let verification_failed = report.verification.as_ref().is_some_and(|v| !v.success);
        if verification_failed {
            if self.migration.auto_rollback {
                log::warn!("Verification failed; rolling back");
                let outcome = RollbackManager::new(BackupManager::new(&self.migration.backup_dir))
                    .perform_rollback(backup, pool)
                    .await;
                report.rolled_back = outcome.success;
                report.rollback = Some(outcome);
            } else {
                log::warn!("Verification failed; auto-rollback disabled, destination left as is");
            }
        }
    }

    async fn check_destination(
        &self,
        pool: &DestinationPool,
        snapshot: &ExportedData,
        report: &mut MigrationReport,
    ) {
        report.verification = Some(self.verify_integrity(pool, snapshot).await);

        if self.config.skip_performance_tests {
            log::info!("Performance tests skipped by request");
        } else {
            let prober =
                ConcurrencyProber::new(self.config.connection_threshold, self.config.query_threshold);
            report.concurrency = Some(
                prober
                    .probe(pool.config(), pool, self.config.concurrent_connections)
                    .await,
            );
            report.performance = Some(
                PerformanceBenchmarker::new(self.config.benchmark_threshold)
                    .benchmark(pool)
                    .await,
            );
        }

        if self.config.skip_api_tests {
            log::info!("API tests skipped by request");
        } else if let Some(base_url) = &self.config.api_base_url {
            let sample = snapshot.packages.first().map(|p| p.tracking_number.as_str());
            report.api = Some(match ApiSmokeTester::new(base_url.clone()) {
                Ok(tester) => tester.run(sample).await,
                Err(e) => ApiResult {
                    base_url: base_url.clone(),
                    errors: vec![format!("Failed to build HTTP client: {}", e)],
                    ..Default::default()
                },
            });
        } else {
            log::info!("API tests skipped: no API base URL configured");
        }
    }

    async fn verify_integrity(&self, pool: &DestinationPool, snapshot: &ExportedData) -> VerificationResult {
        match pool.get().await {
            Ok(client) => IntegrityVerifier::new().verify(&client, snapshot).await,
            Err(e) => VerificationResult {
                errors: vec![format!("No destination connection: {}", e)],
                ..Default::default()
            },
        }
    }
}

fn prerequisite(err: DatabaseError) -> DatabaseError {
    match err {
        DatabaseError::Configuration(message) => DatabaseError::Prerequisite(message),
        other => other,
    }
}
