//! Contact submission CRUD operations against the SQLite source store

use super::{ContactSubmissionsCRUD, timestamp_column};
use crate::db::SourceDb;
use crate::db::error::{DatabaseError, Result};
use crate::model::{ContactSubmission, format_timestamp};

impl ContactSubmissionsCRUD for SourceDb {
    /// Insert a submission after validating email and message length
    fn insert_contact_submission(&self, submission: &ContactSubmission) -> Result<usize> {
        submission
            .validate()
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO contact_submissions (id, name, email, message, submitted_at, resolved)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    submission.id,
                    submission.name,
                    submission.email,
                    submission.message,
                    format_timestamp(&submission.submitted_at),
                    submission.resolved,
                ],
            )
            .map_err(|e| {
                DatabaseError::Query(format!("Failed to insert contact submission: {}", e))
            })
        })
    }

    fn list_contact_submissions(&self) -> Result<Vec<ContactSubmission>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, name, email, message, submitted_at, resolved
                     FROM contact_submissions
                     ORDER BY submitted_at ASC, id ASC",
                )
                .map_err(|e| DatabaseError::Query(format!("Failed to prepare query: {}", e)))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(ContactSubmission {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        message: row.get(3)?,
                        submitted_at: timestamp_column(row, 4)?,
                        resolved: row.get::<_, i64>(5)? != 0,
                    })
                })
                .map_err(|e| {
                    DatabaseError::Query(format!("Failed to query contact submissions: {}", e))
                })?;

            let mut submissions = Vec::new();
            for row in rows {
                submissions.push(row.map_err(|e| {
                    DatabaseError::Query(format!("Failed to map contact submission: {}", e))
                })?);
            }
            Ok(submissions)
        })
    }

    fn count_contact_submissions(&self) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM contact_submissions", [], |row| row.get(0))
                .map_err(|e| {
                    DatabaseError::Query(format!("Failed to count contact submissions: {}", e))
                })
        })
    }
}
