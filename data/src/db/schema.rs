//! Destination schema management
//!
//! Every statement uses `IF NOT EXISTS`, so creating the schema on a
//! destination that already has it is a successful no-op. All DDL runs in
//! one transaction; the catalog is re-read afterwards to confirm the result.

use super::error::{DatabaseError, Result};
use serde::Serialize;
use tokio_postgres::Client;

/// Destination tables in dependency order (parents first)
pub const TABLES: [&str; 3] = ["packages", "status_updates", "contact_submissions"];

pub const INDEXES: [&str; 6] = [
    "idx_packages_tracking_number",
    "idx_packages_status",
    "idx_packages_status_last_updated",
    "idx_status_updates_package_id",
    "idx_status_updates_timestamp",
    "idx_contact_submissions_submitted_at",
];

const CREATE_TABLES: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS packages (
        id TEXT PRIMARY KEY,
        tracking_number VARCHAR(20) NOT NULL UNIQUE,
        status VARCHAR(32) NOT NULL CHECK (status IN
            ('created', 'picked_up', 'in_transit', 'out_for_delivery', 'delivered', 'exception')),
        current_location TEXT NOT NULL,
        destination TEXT NOT NULL,
        estimated_delivery TIMESTAMPTZ,
        last_updated TIMESTAMPTZ NOT NULL,
        customer_name TEXT,
        customer_email TEXT
    )",
    "CREATE TABLE IF NOT EXISTS status_updates (
        id TEXT PRIMARY KEY,
        package_id TEXT NOT NULL REFERENCES packages(id) ON DELETE CASCADE,
        status VARCHAR(32) NOT NULL CHECK (status IN
            ('created', 'picked_up', 'in_transit', 'out_for_delivery', 'delivered', 'exception')),
        location TEXT NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL,
        notes TEXT
    )",
    "CREATE TABLE IF NOT EXISTS contact_submissions (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL,
        message TEXT NOT NULL CHECK (char_length(message) BETWEEN 1 AND 1000),
        submitted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        resolved BOOLEAN NOT NULL DEFAULT FALSE
    )",
];

const CREATE_INDEXES: [&str; 6] = [
    "CREATE INDEX IF NOT EXISTS idx_packages_tracking_number ON packages(tracking_number)",
    "CREATE INDEX IF NOT EXISTS idx_packages_status ON packages(status)",
    "CREATE INDEX IF NOT EXISTS idx_packages_status_last_updated ON packages(status, last_updated DESC)",
    "CREATE INDEX IF NOT EXISTS idx_status_updates_package_id ON status_updates(package_id)",
    "CREATE INDEX IF NOT EXISTS idx_status_updates_timestamp ON status_updates(timestamp DESC)",
    "CREATE INDEX IF NOT EXISTS idx_contact_submissions_submitted_at ON contact_submissions(submitted_at DESC)",
];

/// Tables and indexes confirmed present in the destination catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaOutcome {
    pub tables: Vec<String>,
    pub indexes: Vec<String>,
    /// All tables already existed before this run
    pub already_present: bool,
}

impl SchemaOutcome {
    pub fn tables_created(&self) -> usize {
        self.tables.len()
    }

    pub fn indexes_created(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_complete(&self) -> bool {
        self.tables.len() == TABLES.len() && self.indexes.len() == INDEXES.len()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaManager;

impl SchemaManager {
    pub fn new() -> Self {
        Self
    }

    /// Create tables and indexes in one transaction, then confirm them
    /// against the catalog
    ///
    /// # Errors
    /// `SchemaCreationFailed` if any statement fails (nothing is persisted)
    /// or if the catalog does not list every expected table and index.
    pub async fn create_schema(&self, client: &mut Client) -> Result<SchemaOutcome> {
        let existing = self.existing_tables(client).await?;
        let already_present = existing.len() == TABLES.len();

        log::info!(
            "Creating destination schema ({} of {} tables already present)",
            existing.len(),
            TABLES.len()
        );

        self.run_ddl(client, true).await?;

        let mut outcome = self.verify_schema(client).await?;
        outcome.already_present = already_present;

        if !outcome.is_complete() {
            return Err(DatabaseError::SchemaCreationFailed(format!(
                "catalog lists {}/{} tables and {}/{} indexes after DDL",
                outcome.tables.len(),
                TABLES.len(),
                outcome.indexes.len(),
                INDEXES.len()
            )));
        }

        log::info!(
            "Schema ready: {} tables, {} indexes",
            outcome.tables_created(),
            outcome.indexes_created()
        );
        Ok(outcome)
    }

    /// Execute the DDL inside a transaction that is always rolled back
    ///
    /// Used by dry runs to prove the schema would apply without leaving
    /// anything behind.
    pub async fn validate_schema(&self, client: &mut Client) -> Result<()> {
        self.run_ddl(client, false).await?;
        log::info!("Schema DDL validated (rolled back)");
        Ok(())
    }

    async fn run_ddl(&self, client: &mut Client, commit: bool) -> Result<()> {
        let tx = client.transaction().await.map_err(|e| {
            DatabaseError::SchemaCreationFailed(format!("Failed to start schema transaction: {}", e))
        })?;

        for statement in CREATE_TABLES.iter().chain(CREATE_INDEXES.iter()) {
            if let Err(e) = tx.batch_execute(statement).await {
                let message = format!("{} (statement: {})", e, first_line(statement));
                if let Err(rollback_err) = tx.rollback().await {
                    log::warn!("Schema transaction rollback failed: {}", rollback_err);
                }
                return Err(DatabaseError::SchemaCreationFailed(message));
            }
        }

        let finish = if commit { tx.commit().await } else { tx.rollback().await };
        finish.map_err(|e| {
            DatabaseError::SchemaCreationFailed(format!("Failed to finish schema transaction: {}", e))
        })
    }

    /// Re-read the catalog for the expected tables and indexes
    pub async fn verify_schema(&self, client: &Client) -> Result<SchemaOutcome> {
        let tables = self.existing_tables(client).await?;

        let expected: Vec<&str> = INDEXES.to_vec();
        let rows = client
            .query(
                "SELECT indexname::text FROM pg_indexes
                 WHERE schemaname = current_schema() AND indexname::text = ANY($1)
                 ORDER BY indexname",
                &[&expected],
            )
            .await
            .map_err(DatabaseError::from_pg)?;
        let indexes = rows.iter().map(|row| row.get::<_, String>(0)).collect();

        Ok(SchemaOutcome {
            tables,
            indexes,
            already_present: false,
        })
    }

    /// Names of the pipeline's tables currently present in the destination
    pub async fn existing_tables(&self, client: &Client) -> Result<Vec<String>> {
        let expected: Vec<&str> = TABLES.to_vec();
        let rows = client
            .query(
                "SELECT table_name::text FROM information_schema.tables
                 WHERE table_schema = current_schema() AND table_name::text = ANY($1)
                 ORDER BY table_name",
                &[&expected],
            )
            .await
            .map_err(DatabaseError::from_pg)?;
        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }
}

fn first_line(statement: &str) -> &str {
    statement.lines().next().unwrap_or(statement).trim()
}
