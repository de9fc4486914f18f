//! Transactional bulk upsert of exported records into the destination
//!
//! The whole import is one transaction: packages, then status updates, then
//! contact submissions. Each table is written with multi-row
//! `INSERT ... ON CONFLICT (id) DO UPDATE` statements, so re-importing the
//! same snapshot converges to the same rows. Any failing statement rolls the
//! transaction back and nothing is persisted.

use super::progress::ProgressTracker;
use super::{DEFAULT_BATCH_SIZE, ExportedData, RecordCounts};
use crate::db::{DatabaseError, Result};
use serde::Serialize;
use std::time::Instant;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Transaction};

const PACKAGE_COLUMNS: [&str; 9] = [
    "id",
    "tracking_number",
    "status",
    "current_location",
    "destination",
    "estimated_delivery",
    "last_updated",
    "customer_name",
    "customer_email",
];

const STATUS_UPDATE_COLUMNS: [&str; 6] =
    ["id", "package_id", "status", "location", "timestamp", "notes"];

const CONTACT_SUBMISSION_COLUMNS: [&str; 6] =
    ["id", "name", "email", "message", "submitted_at", "resolved"];

/// Rows written per table by one import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    pub packages_imported: u64,
    pub status_updates_imported: u64,
    pub contact_submissions_imported: u64,
    pub elapsed_ms: u64,
}

impl ImportCounts {
    pub fn as_record_counts(&self) -> RecordCounts {
        RecordCounts::new(
            self.packages_imported,
            self.status_updates_imported,
            self.contact_submissions_imported,
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DataImporter {
    batch_size: usize,
}

impl Default for DataImporter {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl DataImporter {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Upsert every exported row inside a single transaction
    ///
    /// # Errors
    /// `UniqueViolation` / `ForeignKeyViolation` for constraint failures,
    /// `Import` for any other statement failure. The transaction is rolled
    /// back before the error is returned.
    pub async fn import_all(&self, client: &mut Client, data: &ExportedData) -> Result<ImportCounts> {
        let start = Instant::now();
        let total = data.counts().total() as usize;
        log::info!("Importing {} rows in batches of {}", total, self.batch_size);

        let tx = client
            .transaction()
            .await
            .map_err(|e| DatabaseError::Import(format!("Failed to start import transaction: {}", e)))?;

        let mut progress = ProgressTracker::new(total, "Import");
        match self.write_all(&tx, data, &mut progress).await {
            Ok(mut counts) => {
                tx.commit().await.map_err(|e| import_error("commit", e))?;
                progress.finish();
                counts.elapsed_ms = start.elapsed().as_millis() as u64;
                log::info!("Import committed: {}", counts.as_record_counts());
                Ok(counts)
            }
            Err(e) => {
                log::error!("Import failed, rolling back: {}", e);
                if let Err(rollback_err) = tx.rollback().await {
                    log::warn!("Import transaction rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn write_all(
        &self,
        tx: &Transaction<'_>,
        data: &ExportedData,
        progress: &mut ProgressTracker,
    ) -> Result<ImportCounts> {
        let mut counts = ImportCounts::default();

        for chunk in data.packages.chunks(self.batch_size) {
            let statuses: Vec<&str> = chunk.iter().map(|p| p.status.as_str()).collect();
            let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(chunk.len() * 9);
            for (package, status) in chunk.iter().zip(&statuses) {
                params.push(&package.id);
                params.push(&package.tracking_number);
                params.push(status);
                params.push(&package.current_location);
                params.push(&package.destination);
                params.push(&package.estimated_delivery);
                params.push(&package.last_updated);
                params.push(&package.customer_name);
                params.push(&package.customer_email);
            }
            counts.packages_imported +=
                upsert(tx, "packages", &PACKAGE_COLUMNS, chunk.len(), &params).await?;
            progress.update(chunk.len());
        }

        for chunk in data.status_updates.chunks(self.batch_size) {
            let statuses: Vec<&str> = chunk.iter().map(|u| u.status.as_str()).collect();
            let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(chunk.len() * 6);
            for (update, status) in chunk.iter().zip(&statuses) {
                params.push(&update.id);
                params.push(&update.package_id);
                params.push(status);
                params.push(&update.location);
                params.push(&update.timestamp);
                params.push(&update.notes);
            }
            counts.status_updates_imported +=
                upsert(tx, "status_updates", &STATUS_UPDATE_COLUMNS, chunk.len(), &params).await?;
            progress.update(chunk.len());
        }

        for chunk in data.contact_submissions.chunks(self.batch_size) {
            let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(chunk.len() * 6);
            for submission in chunk {
                params.push(&submission.id);
                params.push(&submission.name);
                params.push(&submission.email);
                params.push(&submission.message);
                params.push(&submission.submitted_at);
                params.push(&submission.resolved);
            }
            counts.contact_submissions_imported += upsert(
                tx,
                "contact_submissions",
                &CONTACT_SUBMISSION_COLUMNS,
                chunk.len(),
                &params,
            )
            .await?;
            progress.update(chunk.len());
        }

        Ok(counts)
    }
}

async fn upsert(
    tx: &Transaction<'_>,
    table: &str,
    columns: &[&str],
    rows: usize,
    params: &[&(dyn ToSql + Sync)],
) -> Result<u64> {
    if rows == 0 {
        return Ok(0);
    }
    let statement = upsert_statement(table, columns, rows);
    tx.execute(statement.as_str(), params)
        .await
        .map_err(|e| import_error(table, e))
}

/// `INSERT INTO t (..) VALUES ($1, ..), (..) ON CONFLICT (id) DO UPDATE SET ..`
fn upsert_statement(table: &str, columns: &[&str], rows: usize) -> String {
    let width = columns.len();
    let values = (0..rows)
        .map(|row| {
            let placeholders = (1..=width)
                .map(|col| format!("${}", row * width + col))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", placeholders)
        })
        .collect::<Vec<_>>()
        .join(", ");

    let updates = columns
        .iter()
        .filter(|column| **column != "id")
        .map(|column| format!("{} = EXCLUDED.{}", column, column))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT (id) DO UPDATE SET {}",
        table,
        columns.join(", "),
        values,
        updates
    )
}

/// Constraint violations keep their own variant; everything else is an
/// import failure naming the table
fn import_error(table: &str, err: tokio_postgres::Error) -> DatabaseError {
    match DatabaseError::from_pg(err) {
        DatabaseError::Query(message) => DatabaseError::Import(format!("{}: {}", table, message)),
        other => other,
    }
}
