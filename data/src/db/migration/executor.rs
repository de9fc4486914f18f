//! Migration executor state machine
//!
//! Drives prerequisites, backup, schema, import and a record-count check in
//! strict order. Every transition is reported through the progress callback.
//! A failing destructive step moves to `Failed` and, unless auto-rollback is
//! off, on through `RollingBack` to `RolledBack` (or back to `Failed` when
//! the rollback itself is incomplete).

use super::backup::{BackupManager, BackupMetadata};
use super::export::{DataExporter, ExportedData};
use super::import::{DataImporter, ImportCounts};
use super::progress::{MigrationPhase, ProgressCallback, log_progress};
use super::report::BlockingError;
use super::rollback::{RollbackManager, RollbackOutcome};
use super::verification::IntegrityVerifier;
use super::{MigrationConfig, RecordCounts};
use crate::db::health::{HealthReport, check_destination};
use crate::db::schema::{INDEXES, SchemaManager, SchemaOutcome};
use crate::db::{DatabaseError, DestinationPool, Result, SourceDb, retry_with_backoff_if};
use serde::Serialize;
use std::time::Instant;

/// Everything the executor did, including the failure and rollback if any
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub dry_run: bool,
    /// Final state of the state machine
    pub state: MigrationPhase,
    pub phases_completed: Vec<MigrationPhase>,
    pub failed_phase: Option<MigrationPhase>,
    pub health: Option<HealthReport>,
    pub backup: Option<BackupMetadata>,
    pub schema: Option<SchemaOutcome>,
    pub counts: Option<ImportCounts>,
    /// Rows a dry run found ready to migrate
    pub dry_run_counts: Option<RecordCounts>,
    pub rollback: Option<RollbackOutcome>,
    pub blocking_error: Option<BlockingError>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    /// Source snapshot handed to the verifier; never serialized
    #[serde(skip)]
    pub exported: Option<ExportedData>,
}

impl ExecutionResult {
    fn new(dry_run: bool) -> Self {
        Self {
            success: false,
            dry_run,
            state: MigrationPhase::NotStarted,
            phases_completed: Vec::new(),
            failed_phase: None,
            health: None,
            backup: None,
            schema: None,
            counts: None,
            dry_run_counts: None,
            rollback: None,
            blocking_error: None,
            errors: Vec::new(),
            duration_ms: 0,
            exported: None,
        }
    }

    pub fn rolled_back(&self) -> bool {
        self.state == MigrationPhase::RolledBack
    }
}

pub struct MigrationExecutor {
    config: MigrationConfig,
    progress: ProgressCallback,
    state: MigrationPhase,
    last_percent: u8,
    phases_completed: Vec<MigrationPhase>,
}

impl MigrationExecutor {
    pub fn new(config: MigrationConfig) -> Self {
        Self {
            config,
            progress: log_progress(),
            state: MigrationPhase::NotStarted,
            last_percent: 0,
            phases_completed: Vec::new(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> MigrationPhase {
        self.state
    }

    /// Run the migration against `pool`
    ///
    /// Never returns an error: failures, the rollback outcome and the
    /// operator hint are all carried in the result.
    pub async fn execute(&mut self, pool: &DestinationPool) -> ExecutionResult {
        let start = Instant::now();
        let mut result = ExecutionResult::new(self.config.dry_run);

        if self.config.dry_run {
            log::info!("Dry run: nothing will be written to either database");
        }

        match self.run_steps(pool, &mut result).await {
            Ok(()) => {
                self.transition(MigrationPhase::Succeeded);
                result.success = true;
            }
            Err(e) => {
                let failed_phase = self.state;
                log::error!("Migration failed while {}: {}", failed_phase, e);
                result.failed_phase = Some(failed_phase);
                result.errors.push(e.to_string());
                result.blocking_error = Some(BlockingError::from_error(&e));
                self.transition(MigrationPhase::Failed);

                if self.should_roll_back(failed_phase) {
                    self.transition(MigrationPhase::RollingBack);
                    let rollback = RollbackManager::new(BackupManager::new(&self.config.backup_dir))
                        .perform_rollback(result.backup.as_ref(), pool)
                        .await;
                    result
                        .errors
                        .extend(rollback.errors.iter().map(|e| format!("Rollback: {}", e)));
                    self.transition(if rollback.success {
                        MigrationPhase::RolledBack
                    } else {
                        MigrationPhase::Failed
                    });
                    result.rollback = Some(rollback);
                } else if !self.config.auto_rollback {
                    log::warn!("Auto-rollback disabled; destination left as is");
                }
            }
        }

        result.state = self.state;
        result.phases_completed = self.phases_completed.clone();
        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    async fn run_steps(&mut self, pool: &DestinationPool, result: &mut ExecutionResult) -> Result<()> {
        self.transition(MigrationPhase::ValidatingPrerequisites);
        let source = self.validate_prerequisites(pool, result).await?;

        self.transition(MigrationPhase::CreatingBackup);
        if self.config.dry_run {
            log::info!("Dry run: backup skipped");
        } else {
            result.backup = BackupManager::new(&self.config.backup_dir)
                .create_backup(&self.config.source_path, !self.config.create_backup)
                .await?;
        }

        self.transition(MigrationPhase::SettingUpSchema);
        let schema = SchemaManager::new();
        let mut client = pool.get().await?;

        if self.config.dry_run {
            schema.validate_schema(&mut client).await?;
            let data = DataExporter::new(source).export_all().await?;
            let counts = data.counts();
            log::info!("Dry run: ready to migrate {}", counts);
            result.dry_run_counts = Some(counts);
            result.exported = Some(data);
            return Ok(());
        }

        result.schema = Some(schema.create_schema(&mut client).await?);

        self.transition(MigrationPhase::CreatingIndexes);
        let catalog = schema.verify_schema(&client).await?;
        if catalog.indexes.len() != INDEXES.len() {
            return Err(DatabaseError::SchemaCreationFailed(format!(
                "expected {} indexes, catalog lists {}",
                INDEXES.len(),
                catalog.indexes.len()
            )));
        }
        log::info!("{} indexes confirmed", catalog.indexes.len());

        self.transition(MigrationPhase::MigratingData);
        let data = DataExporter::new(source).export_all().await?;
        let counts = DataImporter::new(self.config.batch_size)
            .import_all(&mut client, &data)
            .await?;
        result.counts = Some(counts);

        self.transition(MigrationPhase::VerifyingIntegrity);
        let table_counts = IntegrityVerifier::new()
            .verify_record_counts(&client, data.counts())
            .await?;
        let mismatched: Vec<String> = table_counts
            .iter()
            .filter(|c| !c.matches())
            .map(|c| {
                format!(
                    "{} (source {}, destination {})",
                    c.table,
                    c.source,
                    c.destination.unwrap_or(0)
                )
            })
            .collect();
        if !mismatched.is_empty() {
            return Err(DatabaseError::Verification(format!(
                "record counts differ after import: {}",
                mismatched.join(", ")
            )));
        }

        result.exported = Some(data);
        Ok(())
    }

    /// Config, source file and destination reachability
    ///
    /// Refused or dropped connections are retried under the configured
    /// policy. A timeout is a hard failure and is returned at once, as is
    /// the final failure after the budget is spent.
    async fn validate_prerequisites(
        &self,
        pool: &DestinationPool,
        result: &mut ExecutionResult,
    ) -> Result<SourceDb> {
        pool.config()
            .validate()
            .map_err(|e| DatabaseError::Prerequisite(e.to_string()))?;

        let source = SourceDb::open(&self.config.source_path)?;
        let stats = source.get_stats()?;
        log::info!(
            "Source {}: {} packages, {} status updates, {} contact submissions ({} bytes)",
            source.db_path().display(),
            stats.packages,
            stats.status_updates,
            stats.contact_submissions,
            stats.database_size_bytes
        );

        let timeout = pool.config().connect_timeout;
        let health = retry_with_backoff_if(
            self.config.retry,
            "Destination connectivity check",
            |e| matches!(e, DatabaseError::Connection(_)),
            || check_destination(pool, timeout),
        )
        .await
        .map_err(|e| DatabaseError::Prerequisite(format!("Destination unreachable: {}", e)))?;

        for warning in &health.warnings {
            log::warn!("{}", warning);
        }
        log::info!("Destination: {}", health.summary());
        result.health = Some(health);
        Ok(source)
    }

    /// Backup and destination steps are rolled back; prerequisite failures
    /// happen before anything was touched
    fn should_roll_back(&self, failed_phase: MigrationPhase) -> bool {
        self.config.auto_rollback
            && !self.config.dry_run
            && matches!(
                failed_phase,
                MigrationPhase::CreatingBackup
                    | MigrationPhase::SettingUpSchema
                    | MigrationPhase::CreatingIndexes
                    | MigrationPhase::MigratingData
                    | MigrationPhase::VerifyingIntegrity
            )
    }

    fn transition(&mut self, next: MigrationPhase) {
        if !self.state.can_transition_to(next) {
            log::error!("Ignoring invalid transition {} -> {}", self.state, next);
            return;
        }

        let moving_forward = next.step().is_some() || next == MigrationPhase::Succeeded;
        if moving_forward && self.state.step().is_some() {
            self.phases_completed.push(self.state);
        }

        self.state = next;
        self.last_percent = next.percent().max(self.last_percent);
        (self.progress)(next, self.last_percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DatabaseConfig, ErrorKind, RetryPolicy};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    fn unreachable_pool() -> DestinationPool {
        let config = DatabaseConfig::new("postgres://app:pw@127.0.0.1:1/tracker")
            .with_connect_timeout(Duration::from_millis(200));
        DestinationPool::new(config).unwrap()
    }

    fn recording_callback() -> (ProgressCallback, Arc<Mutex<Vec<(MigrationPhase, u8)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |phase, percent| {
            sink.lock().unwrap().push((phase, percent));
        });
        (callback, seen)
    }

    #[tokio::test]
    async fn test_missing_source_fails_prerequisites() {
        let temp_dir = TempDir::new().unwrap();
        let config = MigrationConfig::new(temp_dir.path().join("missing.db"))
            .with_backup_dir(temp_dir.path().join("backups"))
            .with_retry(RetryPolicy::none());
        let (callback, seen) = recording_callback();

        let pool = unreachable_pool();
        let result = MigrationExecutor::new(config)
            .with_progress(callback)
            .execute(&pool)
            .await;

        assert!(!result.success);
        assert_eq!(result.state, MigrationPhase::Failed);
        assert_eq!(result.failed_phase, Some(MigrationPhase::ValidatingPrerequisites));
        assert!(result.rollback.is_none());
        assert_eq!(
            result.blocking_error.as_ref().map(|e| e.kind),
            Some(ErrorKind::Prerequisite)
        );
        assert!(!temp_dir.path().join("backups").exists());

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (MigrationPhase::ValidatingPrerequisites, 16),
                (MigrationPhase::Failed, 16)
            ]
        );
    }

    #[tokio::test]
    async fn test_unreachable_destination_fails_fast() {
        let temp_dir = TempDir::new().unwrap();
        let source_path = temp_dir.path().join("packages.db");
        SourceDb::create(&source_path).unwrap();

        let config = MigrationConfig::new(&source_path)
            .with_backup_dir(temp_dir.path().join("backups"))
            .with_retry(RetryPolicy::none());
        let pool = unreachable_pool();
        let result = MigrationExecutor::new(config).execute(&pool).await;

        assert!(!result.success);
        assert!(result.errors[0].contains("Destination unreachable"));
        assert!(result.backup.is_none());
        assert!(result.phases_completed.is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_destination_is_not_retried() {
        // Accepts the TCP handshake but never answers the startup message
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = silent.local_addr().unwrap().port();

        let temp_dir = TempDir::new().unwrap();
        let source_path = temp_dir.path().join("packages.db");
        SourceDb::create(&source_path).unwrap();

        let config = MigrationConfig::new(&source_path)
            .with_backup_dir(temp_dir.path().join("backups"))
            .with_retry(RetryPolicy::new(3, Duration::from_secs(5)));
        let db_config = DatabaseConfig::new(format!("postgres://app:pw@127.0.0.1:{}/tracker", port))
            .with_connect_timeout(Duration::from_millis(200));
        let pool = DestinationPool::new(db_config).unwrap();

        let started = std::time::Instant::now();
        let result = MigrationExecutor::new(config).execute(&pool).await;

        // A single retry would sleep for the 5s base delay
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!result.success);
        assert_eq!(result.failed_phase, Some(MigrationPhase::ValidatingPrerequisites));
        assert_eq!(
            result.blocking_error.as_ref().map(|e| e.kind),
            Some(ErrorKind::Prerequisite)
        );
        drop(silent);
    }

    #[test]
    fn test_rollback_after_backup_and_destination_steps() {
        let executor = MigrationExecutor::new(MigrationConfig::default());
        assert!(!executor.should_roll_back(MigrationPhase::ValidatingPrerequisites));
        assert!(executor.should_roll_back(MigrationPhase::CreatingBackup));
        assert!(executor.should_roll_back(MigrationPhase::MigratingData));

        let suppressed = MigrationExecutor::new(MigrationConfig::default().with_auto_rollback(false));
        assert!(!suppressed.should_roll_back(MigrationPhase::CreatingBackup));
        assert!(!suppressed.should_roll_back(MigrationPhase::MigratingData));

        let dry_run = MigrationExecutor::new(MigrationConfig::default().with_dry_run(true));
        assert!(!dry_run.should_roll_back(MigrationPhase::CreatingBackup));
    }

    #[test]
    fn test_invalid_transition_is_ignored() {
        let mut executor = MigrationExecutor::new(MigrationConfig::default());
        executor.transition(MigrationPhase::MigratingData);
        assert_eq!(executor.state(), MigrationPhase::NotStarted);

        executor.transition(MigrationPhase::ValidatingPrerequisites);
        executor.transition(MigrationPhase::CreatingBackup);
        assert_eq!(executor.phases_completed, vec![MigrationPhase::ValidatingPrerequisites]);
    }
}
