//! Package CRUD operations against the SQLite source store

use super::{
    PackagesCRUD, optional_text_column, optional_timestamp_column, status_column,
    timestamp_column,
};
use crate::db::SourceDb;
use crate::db::error::{DatabaseError, Result};
use crate::model::{Package, format_timestamp};
use rusqlite::OptionalExtension;

const SELECT_PACKAGE: &str = "SELECT id, tracking_number, status, current_location, destination,
            estimated_delivery, last_updated, customer_name, customer_email
     FROM packages";

fn map_package(row: &rusqlite::Row<'_>) -> rusqlite::Result<Package> {
    Ok(Package {
        id: row.get(0)?,
        tracking_number: row.get(1)?,
        status: status_column(row, 2)?,
        current_location: row.get(3)?,
        destination: row.get(4)?,
        estimated_delivery: optional_timestamp_column(row, 5)?,
        last_updated: timestamp_column(row, 6)?,
        customer_name: optional_text_column(row, 7)?,
        customer_email: optional_text_column(row, 8)?,
    })
}

impl PackagesCRUD for SourceDb {
    /// Insert a package after normalizing its tracking number
    fn insert_package(&self, package: &Package) -> Result<usize> {
        let tracking_number = Package::normalize_tracking_number(&package.tracking_number)
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO packages (id, tracking_number, status, current_location, destination,
                                       estimated_delivery, last_updated, customer_name, customer_email)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    package.id,
                    tracking_number,
                    package.status.as_str(),
                    package.current_location,
                    package.destination,
                    package.estimated_delivery.as_ref().map(format_timestamp),
                    format_timestamp(&package.last_updated),
                    package.customer_name,
                    package.customer_email,
                ],
            )
            .map_err(|e| DatabaseError::Query(format!("Failed to insert package: {}", e)))
        })
    }

    fn list_packages(&self) -> Result<Vec<Package>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("{} ORDER BY id ASC", SELECT_PACKAGE))
                .map_err(|e| DatabaseError::Query(format!("Failed to prepare query: {}", e)))?;

            let rows = stmt
                .query_map([], map_package)
                .map_err(|e| DatabaseError::Query(format!("Failed to query packages: {}", e)))?;

            let mut packages = Vec::new();
            for row in rows {
                packages.push(
                    row.map_err(|e| DatabaseError::Query(format!("Failed to map package: {}", e)))?,
                );
            }
            Ok(packages)
        })
    }

    fn find_package_by_tracking_number(&self, tracking_number: &str) -> Result<Option<Package>> {
        let Ok(normalized) = Package::normalize_tracking_number(tracking_number) else {
            return Ok(None);
        };

        self.with_conn(|conn| {
            conn.query_row(
                &format!("{} WHERE tracking_number = ?1", SELECT_PACKAGE),
                [normalized],
                map_package,
            )
            .optional()
            .map_err(|e| DatabaseError::Query(format!("Failed to look up package: {}", e)))
        })
    }

    fn count_packages(&self) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM packages", [], |row| row.get(0))
                .map_err(|e| DatabaseError::Query(format!("Failed to count packages: {}", e)))
        })
    }
}
