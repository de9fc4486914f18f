//! SQLite → PostgreSQL migration pipeline for the package tracker
//!
//! The executor runs the destructive part of a migration:
//!
//! 1. Prerequisite validation (config, destination reachability, source file)
//! 2. Byte-for-byte backup of the source file
//! 3. Destination schema and indexes
//! 4. Export of every source row and one-transaction upsert into the destination
//! 5. A record-count check of what was written
//!
//! The orchestrator wraps the executor with integrity verification,
//! concurrency probing, query benchmarks and optional API smoke checks,
//! and always produces a `MigrationReport`.
//!
//! Data safety comes from:
//! - A backup taken before the destination is touched
//! - Transactional DDL and import (nothing partial is ever committed)
//! - Rollback that drops destination tables and restores the backup

pub mod api;
pub mod backup;
pub mod concurrency;
pub mod executor;
pub mod export;
pub mod import;
pub mod orchestrator;
pub mod performance;
pub mod progress;
pub mod report;
pub mod rollback;
pub mod verification;

pub use api::{ApiCheck, ApiResult, ApiSmokeTester};
pub use backup::{BackupManager, BackupMetadata};
pub use concurrency::{ConcurrencyProber, ConcurrencyResult};
pub use executor::{ExecutionResult, MigrationExecutor};
pub use export::{DataExporter, ExportedData};
pub use import::{DataImporter, ImportCounts};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use performance::{PerformanceBenchmarker, PerformanceResult};
pub use progress::{MigrationPhase, ProgressCallback, ProgressTracker, log_progress};
pub use report::{BlockingError, MigrationReport};
pub use rollback::{RollbackManager, RollbackOutcome};
pub use verification::{IntegrityVerifier, VerificationResult};

use crate::db::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Rows per multi-row upsert statement
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Per-table row counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub packages: u64,
    pub status_updates: u64,
    pub contact_submissions: u64,
}

impl RecordCounts {
    pub fn new(packages: u64, status_updates: u64, contact_submissions: u64) -> Self {
        Self {
            packages,
            status_updates,
            contact_submissions,
        }
    }

    pub fn total(&self) -> u64 {
        self.packages + self.status_updates + self.contact_submissions
    }

    /// Counts paired with their destination table names
    pub fn by_table(&self) -> [(&'static str, u64); 3] {
        [
            ("packages", self.packages),
            ("status_updates", self.status_updates),
            ("contact_submissions", self.contact_submissions),
        ]
    }
}

impl fmt::Display for RecordCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packages, {} status updates, {} contact submissions",
            self.packages, self.status_updates, self.contact_submissions
        )
    }
}

/// Settings for one executor run
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// SQLite file being migrated from
    pub source_path: PathBuf,
    /// Directory holding backup copies and their manifests
    pub backup_dir: PathBuf,
    /// Directory the orchestrator writes reports into
    pub report_dir: PathBuf,
    /// Validate the plan without writing anything
    pub dry_run: bool,
    pub create_backup: bool,
    /// Roll back automatically when a destructive step fails
    pub auto_rollback: bool,
    pub batch_size: usize,
    /// Applied to the destination connectivity check only
    pub retry: RetryPolicy,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("data/packages.db"),
            backup_dir: PathBuf::from("backups"),
            report_dir: PathBuf::from("migration-reports"),
            dry_run: false,
            create_backup: true,
            auto_rollback: true,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl MigrationConfig {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            ..Self::default()
        }
    }

    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_backup(mut self, create_backup: bool) -> Self {
        self.create_backup = create_backup;
        self
    }

    pub fn with_auto_rollback(mut self, auto_rollback: bool) -> Self {
        self.auto_rollback = auto_rollback;
        self
    }

    /// Zero is clamped to one row per statement
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
