//! CRUD operations for the package tracker's source store
//!
//! This module provides Create and Read operations for:
//! - Packages: shipments keyed by id with a unique tracking number
//! - Status updates: the event history of a package
//! - Contact submissions: messages sent through the contact form
//!
//! The migration only reads through these traits; inserts exist for the
//! application and for seeding test stores.

use super::error::Result;
use crate::model::{ContactSubmission, Package, StatusUpdate};

/// Trait for Package CRUD operations
pub trait PackagesCRUD {
    /// Insert a single package
    fn insert_package(&self, package: &Package) -> Result<usize>;

    /// Load every package, ordered by id
    fn list_packages(&self) -> Result<Vec<Package>>;

    /// Look up a package by tracking number (normalized before lookup)
    fn find_package_by_tracking_number(&self, tracking_number: &str) -> Result<Option<Package>>;

    fn count_packages(&self) -> Result<i64>;
}

/// Trait for StatusUpdate CRUD operations
pub trait StatusUpdatesCRUD {
    fn insert_status_update(&self, update: &StatusUpdate) -> Result<usize>;

    /// Load every status update ordered by timestamp ascending
    fn list_status_updates(&self) -> Result<Vec<StatusUpdate>>;

    /// History of one package, oldest first
    fn list_status_updates_for_package(&self, package_id: &str) -> Result<Vec<StatusUpdate>>;

    fn count_status_updates(&self) -> Result<i64>;
}

/// Trait for ContactSubmission CRUD operations
pub trait ContactSubmissionsCRUD {
    fn insert_contact_submission(&self, submission: &ContactSubmission) -> Result<usize>;

    /// Load every submission, oldest first
    fn list_contact_submissions(&self) -> Result<Vec<ContactSubmission>>;

    fn count_contact_submissions(&self) -> Result<i64>;
}

// Import implementations
pub mod contact_submissions;
pub mod packages;
pub mod status_updates;

/// Row-mapping failures are reported as conversion errors on the column
fn invalid_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn timestamp_column(
    row: &rusqlite::Row<'_>,
    index: usize,
) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    let raw: String = row.get(index)?;
    crate::model::parse_timestamp(&raw)
        .ok_or_else(|| invalid_column(index, format!("invalid timestamp '{}'", raw)))
}

fn optional_timestamp_column(
    row: &rusqlite::Row<'_>,
    index: usize,
) -> rusqlite::Result<Option<chrono::DateTime<chrono::Utc>>> {
    let raw: Option<String> = row.get(index)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => crate::model::parse_timestamp(value)
            .map(Some)
            .ok_or_else(|| invalid_column(index, format!("invalid timestamp '{}'", value))),
    }
}

fn status_column(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<crate::model::PackageStatus> {
    let raw: String = row.get(index)?;
    raw.parse()
        .map_err(|e: crate::model::ValidationError| invalid_column(index, e.to_string()))
}

/// Empty strings in optional text columns are stored as NULL downstream
fn optional_text_column(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<Option<String>> {
    let raw: Option<String> = row.get(index)?;
    Ok(raw.filter(|value| !value.is_empty()))
}
