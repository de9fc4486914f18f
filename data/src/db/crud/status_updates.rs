//! Status update CRUD operations against the SQLite source store

use super::{StatusUpdatesCRUD, optional_text_column, status_column, timestamp_column};
use crate::db::SourceDb;
use crate::db::error::{DatabaseError, Result};
use crate::model::{StatusUpdate, format_timestamp};

fn map_status_update(row: &rusqlite::Row<'_>) -> rusqlite::Result<StatusUpdate> {
    Ok(StatusUpdate {
        id: row.get(0)?,
        package_id: row.get(1)?,
        status: status_column(row, 2)?,
        location: row.get(3)?,
        timestamp: timestamp_column(row, 4)?,
        notes: optional_text_column(row, 5)?,
    })
}

impl SourceDb {
    fn query_status_updates(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<StatusUpdate>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| DatabaseError::Query(format!("Failed to prepare query: {}", e)))?;

            let rows = stmt.query_map(params, map_status_update).map_err(|e| {
                DatabaseError::Query(format!("Failed to query status updates: {}", e))
            })?;

            let mut updates = Vec::new();
            for row in rows {
                updates.push(row.map_err(|e| {
                    DatabaseError::Query(format!("Failed to map status update: {}", e))
                })?);
            }
            Ok(updates)
        })
    }
}

impl StatusUpdatesCRUD for SourceDb {
    fn insert_status_update(&self, update: &StatusUpdate) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO status_updates (id, package_id, status, location, timestamp, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    update.id,
                    update.package_id,
                    update.status.as_str(),
                    update.location,
                    format_timestamp(&update.timestamp),
                    update.notes,
                ],
            )
            .map_err(|e| DatabaseError::Query(format!("Failed to insert status update: {}", e)))
        })
    }

    /// Timestamp order gives a deterministic replay; id breaks ties
    fn list_status_updates(&self) -> Result<Vec<StatusUpdate>> {
        self.query_status_updates(
            "SELECT id, package_id, status, location, timestamp, notes
             FROM status_updates
             ORDER BY timestamp ASC, id ASC",
            &[],
        )
    }

    fn list_status_updates_for_package(&self, package_id: &str) -> Result<Vec<StatusUpdate>> {
        self.query_status_updates(
            "SELECT id, package_id, status, location, timestamp, notes
             FROM status_updates
             WHERE package_id = ?1
             ORDER BY timestamp ASC, id ASC",
            &[&package_id],
        )
    }

    fn count_status_updates(&self) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM status_updates", [], |row| row.get(0))
                .map_err(|e| DatabaseError::Query(format!("Failed to count status updates: {}", e)))
        })
    }
}
