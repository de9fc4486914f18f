use thiserror::Error;

/// SQLSTATE for `unique_violation`
const PG_UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE for `foreign_key_violation`
const PG_FOREIGN_KEY_VIOLATION: &str = "23503";

/// Failure classes surfaced to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Prerequisite,
    Backup,
    Schema,
    Import,
    Verification,
    Concurrency,
    Performance,
    Api,
    Rollback,
    Connection,
    Query,
}

/// Database-specific errors with rich context for debugging and recovery
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Bad configuration, unreachable destination or missing source file
    #[error("Prerequisite check failed: {0}")]
    Prerequisite(String),

    /// Backup copy or restore failed
    #[error("Backup error: {0}")]
    Backup(String),

    /// Backup file size differs from the source it was copied from
    #[error("Backup verification failed: source is {source_bytes} bytes, backup is {backup_bytes} bytes")]
    BackupVerificationFailed { source_bytes: u64, backup_bytes: u64 },

    /// DDL failed; the schema transaction was rolled back
    #[error("Schema creation failed: {0}")]
    SchemaCreationFailed(String),

    /// Bulk write failed; the import transaction was rolled back
    #[error("Import error: {0}")]
    Import(String),

    /// Unique constraint rejected a row
    #[error("Unique constraint '{constraint}' violated on table '{table}'")]
    UniqueViolation { table: String, constraint: String },

    /// Foreign key constraint rejected a row
    #[error("Foreign key constraint '{constraint}' violated on table '{table}'")]
    ForeignKeyViolation { table: String, constraint: String },

    /// Destination data present but inconsistent with the source
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Destination could not sustain the requested parallel connections
    #[error("Concurrency check failed: {0}")]
    Concurrency(String),

    /// A benchmarked query failed or exceeded its threshold
    #[error("Performance check failed: {0}")]
    Performance(String),

    /// The deployed API did not answer as expected
    #[error("API check failed: {0}")]
    Api(String),

    /// Cleanup after a failure did not complete
    #[error("Rollback error: {0}")]
    Rollback(String),

    /// Failed to establish or access database connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// An operation exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Query execution failed
    #[error("Query error: {0}")]
    Query(String),

    /// Database configuration is invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Reading a source table failed
    #[error("Export of table '{table}' failed: {message}")]
    Export { table: String, message: String },

    /// Lock acquisition failed (threading issue)
    #[error("Lock error: failed to acquire database lock")]
    LockError,

    /// Underlying embedded store error
    #[error("SQLite error: {0}")]
    Source(#[from] rusqlite::Error),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DatabaseError {
    /// Classify a destination driver error once, at the boundary
    ///
    /// Constraint violations keep their table and constraint names so the
    /// report can name them; everything else is bucketed by whether the
    /// connection itself went away.
    pub fn from_pg(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let table = db_err.table().unwrap_or("unknown").to_string();
            let constraint = db_err.constraint().unwrap_or("unknown").to_string();
            return match db_err.code().code() {
                PG_UNIQUE_VIOLATION => DatabaseError::UniqueViolation { table, constraint },
                PG_FOREIGN_KEY_VIOLATION => DatabaseError::ForeignKeyViolation { table, constraint },
                _ => DatabaseError::Query(db_err.message().to_string()),
            };
        }
        let io_failure =
            std::error::Error::source(&err).is_some_and(|source| source.is::<std::io::Error>());
        if err.is_closed() || io_failure {
            DatabaseError::Connection(err.to_string())
        } else {
            DatabaseError::Query(err.to_string())
        }
    }

    /// Pool checkout failures are connection problems unless the backend
    /// itself answered with an error
    pub fn from_pool(err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Backend(e) => DatabaseError::from_pg(e),
            deadpool_postgres::PoolError::Timeout(kind) => {
                DatabaseError::Timeout(format!("pool {:?} timeout", kind))
            }
            other => DatabaseError::Connection(other.to_string()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DatabaseError::Prerequisite(_) | DatabaseError::Configuration(_) => {
                ErrorKind::Prerequisite
            }
            DatabaseError::Backup(_) | DatabaseError::BackupVerificationFailed { .. } => {
                ErrorKind::Backup
            }
            DatabaseError::SchemaCreationFailed(_) => ErrorKind::Schema,
            DatabaseError::Import(_)
            | DatabaseError::UniqueViolation { .. }
            | DatabaseError::ForeignKeyViolation { .. } => ErrorKind::Import,
            DatabaseError::Verification(_) => ErrorKind::Verification,
            DatabaseError::Concurrency(_) => ErrorKind::Concurrency,
            DatabaseError::Performance(_) => ErrorKind::Performance,
            DatabaseError::Api(_) => ErrorKind::Api,
            DatabaseError::Rollback(_) => ErrorKind::Rollback,
            DatabaseError::Connection(_) | DatabaseError::Timeout(_) | DatabaseError::LockError => {
                ErrorKind::Connection
            }
            DatabaseError::Query(_)
            | DatabaseError::Export { .. }
            | DatabaseError::Source(_)
            | DatabaseError::Io(_) => ErrorKind::Query,
        }
    }

    /// Whether retrying the same operation could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, DatabaseError::Connection(_) | DatabaseError::Timeout(_))
    }

    /// Short operator-facing hint printed next to the error
    pub fn remediation(&self) -> &'static str {
        match self {
            DatabaseError::UniqueViolation { .. } => {
                "Resolve duplicate values in the source (e.g. repeated tracking numbers) and re-run"
            }
            DatabaseError::ForeignKeyViolation { .. } => {
                "Remove status updates that reference missing packages in the source and re-run"
            }
            DatabaseError::Connection(_) | DatabaseError::Timeout(_) => {
                "Check that the destination is reachable and the connection string is correct"
            }
            _ => match self.kind() {
                ErrorKind::Prerequisite => {
                    "Check DATABASE_URL / --connection-string and that the source database file exists"
                }
                ErrorKind::Backup => {
                    "Check free disk space and permissions on the backup directory, or pass --skip-backup"
                }
                ErrorKind::Schema => "Check that the destination user may create tables and indexes",
                ErrorKind::Import => "Inspect the source rows named in the error; nothing was committed",
                ErrorKind::Verification => {
                    "Do not cut traffic over; inspect the report and re-run the migration"
                }
                ErrorKind::Concurrency => {
                    "Raise max_connections on the destination or lower --concurrent-connections"
                }
                ErrorKind::Performance => {
                    "Check that the indexes exist and the destination is not under load, then re-run verify"
                }
                ErrorKind::Api => "Check that the deployment at --api-base-url points at the new database",
                ErrorKind::Rollback => {
                    "Restore the source file from the backups directory and drop destination tables by hand"
                }
                ErrorKind::Connection | ErrorKind::Query => {
                    "Re-run with --verbose and inspect the log for the failing statement"
                }
            },
        }
    }
}

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;
