//! Database infrastructure for the package tracker migration
//!
//! This module provides both ends of the SQLite → PostgreSQL move:
//! - The embedded source store, accessed through `SourceDb` (Arc<Mutex<Connection>>)
//! - The destination connection pool (`DestinationPool`, deadpool-postgres)
//! - Destination schema management
//! - The migration pipeline: backup, export, import, verification, rollback
//! - Rich error types for debugging

use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod crud;
pub mod error;
pub mod health;
pub mod metrics;
pub mod migration;
pub mod pool;
pub mod retry;
pub mod schema;

pub use crud::{ContactSubmissionsCRUD, PackagesCRUD, StatusUpdatesCRUD};
pub use error::{DatabaseError, ErrorKind, Result};
pub use health::{HealthReport, check_destination};
pub use metrics::{MemoryUsage, MetricTimer, MetricsSnapshot, PerformanceMetrics, process_memory};
pub use migration::{
    ApiResult, ApiSmokeTester, BackupManager, BackupMetadata, BlockingError, ConcurrencyProber,
    ConcurrencyResult, DEFAULT_BATCH_SIZE, DataExporter, DataImporter, ExecutionResult, ExportedData, ImportCounts,
    IntegrityVerifier, MigrationConfig, MigrationExecutor, MigrationPhase, MigrationReport,
    Orchestrator, OrchestratorConfig, PerformanceBenchmarker, PerformanceResult, ProgressCallback,
    RecordCounts, RollbackManager, RollbackOutcome, VerificationResult, log_progress,
};
pub use pool::{DatabaseConfig, DestinationPool, PoolOccupancy};
pub use retry::{RetryPolicy, retry_with_backoff, retry_with_backoff_if};
pub use schema::{SchemaManager, SchemaOutcome};

/// Embedded schema SQL for the application's source store
const SOURCE_SCHEMA_SQL: &str = include_str!("source_schema.sql");

/// Row counts of the source store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub packages: i64,
    pub status_updates: i64,
    pub contact_submissions: i64,
    /// Database file size in bytes
    pub database_size_bytes: u64,
}

/// Handle to the embedded SQLite store the migration reads from
///
/// Access is serialized through Arc<Mutex<Connection>>; rusqlite connections
/// are not shareable across threads otherwise.
pub struct SourceDb {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SourceDb {
    /// Open an existing source database
    ///
    /// # Errors
    /// Returns `Prerequisite` if the file does not exist, cannot be read, or
    /// is not a SQLite database.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if !db_path.is_file() {
            return Err(DatabaseError::Prerequisite(format!(
                "Source database not found at {}",
                db_path.display()
            )));
        }

        std::fs::File::open(&db_path).map_err(|e| {
            DatabaseError::Prerequisite(format!(
                "Source database at {} is not readable: {}",
                db_path.display(),
                e
            ))
        })?;

        let conn = Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_WRITE)
            .map_err(|e| {
                DatabaseError::Prerequisite(format!(
                    "Failed to open source database at {}: {}",
                    db_path.display(),
                    e
                ))
            })?;

        let source = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        };

        // Touch the schema so a non-SQLite file fails here, not mid-export
        source.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(|e| {
                DatabaseError::Prerequisite(format!("Source file is not a SQLite database: {}", e))
            })
        })?;

        log::debug!("Opened source database {}", source.db_path.display());
        Ok(source)
    }

    /// Create (or open) a source database and make sure the application
    /// tables exist
    pub fn create<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(&db_path).map_err(|e| {
            DatabaseError::Connection(format!(
                "Failed to open database at {}: {}",
                db_path.display(),
                e
            ))
        })?;

        let source = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        };
        source.initialize_schema()?;
        Ok(source)
    }

    /// Provides safe access to the underlying SQLite connection
    ///
    /// # Errors
    /// Returns LockError if mutex is poisoned
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut MutexGuard<Connection>) -> Result<T>,
    {
        let mut guard = self.conn.lock().map_err(|_| DatabaseError::LockError)?;
        f(&mut guard)
    }

    /// Create the application tables if they are missing
    pub fn initialize_schema(&self) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(SOURCE_SCHEMA_SQL).map_err(|e| {
                DatabaseError::SchemaCreationFailed(format!(
                    "Failed to initialize source schema: {}",
                    e
                ))
            })?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_stats(&self) -> Result<SourceStats> {
        let database_size_bytes = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(SourceStats {
            packages: self.count_packages()?,
            status_updates: self.count_status_updates()?,
            contact_submissions: self.count_contact_submissions()?,
            database_size_bytes,
        })
    }

    /// Get path to database file
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Execute a health check to verify database is accessible
    pub fn health_check(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| DatabaseError::Query(format!("Health check failed: {}", e)))?;
            Ok(())
        })
    }
}

// Arc-based sharing so blocking reads can move a handle onto a worker thread
impl Clone for SourceDb {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            db_path: self.db_path.clone(),
        }
    }
}
