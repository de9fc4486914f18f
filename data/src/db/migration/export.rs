//! Full-table export of the source store into typed in-memory records

use super::RecordCounts;
use crate::db::{
    ContactSubmissionsCRUD, DatabaseError, PackagesCRUD, Result, SourceDb, StatusUpdatesCRUD,
};
use crate::model::{ContactSubmission, Package, StatusUpdate};

/// Every row of the three source tables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportedData {
    pub packages: Vec<Package>,
    /// Ordered by timestamp ascending
    pub status_updates: Vec<StatusUpdate>,
    pub contact_submissions: Vec<ContactSubmission>,
}

impl ExportedData {
    pub fn counts(&self) -> RecordCounts {
        RecordCounts::new(
            self.packages.len() as u64,
            self.status_updates.len() as u64,
            self.contact_submissions.len() as u64,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }
}

/// Reads the source store through its CRUD layer
///
/// No pagination: the whole source is expected to fit in memory.
#[derive(Clone)]
pub struct DataExporter {
    source: SourceDb,
}

impl DataExporter {
    pub fn new(source: SourceDb) -> Self {
        Self { source }
    }

    /// Export on a blocking worker so the runtime keeps servicing I/O
    pub async fn export_all(&self) -> Result<ExportedData> {
        let exporter = self.clone();
        tokio::task::spawn_blocking(move || exporter.export_all_blocking())
            .await
            .map_err(|e| DatabaseError::Query(format!("Export task failed: {}", e)))?
    }

    /// Read all three tables; the first failing table aborts the export
    pub fn export_all_blocking(&self) -> Result<ExportedData> {
        let packages = self
            .source
            .list_packages()
            .map_err(|e| export_error("packages", e))?;
        let status_updates = self
            .source
            .list_status_updates()
            .map_err(|e| export_error("status_updates", e))?;
        let contact_submissions = self
            .source
            .list_contact_submissions()
            .map_err(|e| export_error("contact_submissions", e))?;

        let data = ExportedData {
            packages,
            status_updates,
            contact_submissions,
        };
        log::info!("Exported {}", data.counts());
        Ok(data)
    }
}

fn export_error(table: &str, err: DatabaseError) -> DatabaseError {
    log::error!("Export of {} failed: {}", table, err);
    DatabaseError::Export {
        table: table.to_string(),
        message: err.to_string(),
    }
}
