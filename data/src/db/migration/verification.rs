//! Post-migration integrity verification
//!
//! Compares the destination against the in-memory source snapshot: row
//! counts per table, orphaned status updates, and a field comparison of a
//! small package sample. Step failures are collected into the result; the
//! verifier never returns early with an error.

use super::{ExportedData, RecordCounts};
use crate::db::schema::TABLES;
use crate::db::{DatabaseError, Result};
use crate::model::Package;
use serde::Serialize;
use std::time::Instant;
use tokio_postgres::Client;

/// Packages compared field by field
pub const SAMPLE_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCount {
    pub table: String,
    pub source: u64,
    /// `None` when the destination count could not be read
    pub destination: Option<u64>,
}

impl TableCount {
    pub fn matches(&self) -> bool {
        self.destination == Some(self.source)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForeignKeyIntegrity {
    pub valid: bool,
    pub orphaned_records: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleCheck {
    pub id: String,
    pub tracking_number: String,
    pub passed: bool,
    pub mismatches: Vec<String>,
}

/// Outcome of one verification pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationResult {
    pub success: bool,
    pub record_counts: Vec<TableCount>,
    pub foreign_key_integrity: ForeignKeyIntegrity,
    pub samples: Vec<SampleCheck>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl VerificationResult {
    pub fn counts_match(&self) -> bool {
        !self.record_counts.is_empty() && self.record_counts.iter().all(TableCount::matches)
    }

    pub fn orphaned_records(&self) -> u64 {
        self.foreign_key_integrity.orphaned_records
    }

    pub fn failed_samples(&self) -> usize {
        self.samples.iter().filter(|s| !s.passed).count()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Run all three checks against the destination
    ///
    /// Success requires every table count to match, zero orphaned status
    /// updates and zero failed samples.
    pub async fn verify(&self, client: &Client, source: &ExportedData) -> VerificationResult {
        log::info!("Running integrity verification...");
        let start = Instant::now();
        let mut result = VerificationResult::default();

        // Check 1: record counts
        match self.verify_record_counts(client, source.counts()).await {
            Ok(counts) => {
                for count in counts.iter().filter(|c| !c.matches()) {
                    result.errors.push(format!(
                        "Record count mismatch for {}: source {}, destination {}",
                        count.table,
                        count.source,
                        count
                            .destination
                            .map(|d| d.to_string())
                            .unwrap_or_else(|| "unknown".to_string())
                    ));
                }
                result.record_counts = counts;
            }
            Err(e) => result.errors.push(format!("Record count check failed: {}", e)),
        }

        // Check 2: orphaned status updates
        match self.count_orphaned_status_updates(client).await {
            Ok(orphans) => {
                result.foreign_key_integrity = ForeignKeyIntegrity {
                    valid: orphans == 0,
                    orphaned_records: orphans,
                };
                if orphans > 0 {
                    result.errors.push(format!(
                        "{} status update(s) reference missing packages",
                        orphans
                    ));
                }
            }
            Err(e) => {
                result.foreign_key_integrity.valid = false;
                result.errors.push(format!("Foreign key check failed: {}", e));
            }
        }

        // Check 3: sample records
        for package in source.packages.iter().take(SAMPLE_SIZE) {
            let check = self.check_sample(client, package).await;
            if !check.passed {
                result.errors.push(format!(
                    "Sample {} failed: {}",
                    check.id,
                    check.mismatches.join("; ")
                ));
            }
            result.samples.push(check);
        }

        result.success = result.counts_match()
            && result.foreign_key_integrity.valid
            && result.failed_samples() == 0
            && result.errors.is_empty();
        result.duration_ms = start.elapsed().as_millis() as u64;

        if result.success {
            log::info!(
                "Verification passed: {} tables, {} samples",
                result.record_counts.len(),
                result.samples.len()
            );
        } else {
            for error in &result.errors {
                log::warn!("Verification: {}", error);
            }
        }
        result
    }

    /// Count destination rows per table and pair them with the expected counts
    pub async fn verify_record_counts(
        &self,
        client: &Client,
        expected: RecordCounts,
    ) -> Result<Vec<TableCount>> {
        let mut counts = Vec::with_capacity(TABLES.len());
        for (table, source) in expected.by_table() {
            let destination = count_rows(client, table).await?;
            counts.push(TableCount {
                table: table.to_string(),
                source,
                destination: Some(destination),
            });
        }
        Ok(counts)
    }

    /// Status updates whose package_id matches no package
    pub async fn count_orphaned_status_updates(&self, client: &Client) -> Result<u64> {
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM status_updates su
                 LEFT JOIN packages p ON p.id = su.package_id
                 WHERE p.id IS NULL",
                &[],
            )
            .await
            .map_err(DatabaseError::from_pg)?;
        Ok(row.get::<_, i64>(0) as u64)
    }

    async fn check_sample(&self, client: &Client, package: &Package) -> SampleCheck {
        let mut check = SampleCheck {
            id: package.id.clone(),
            tracking_number: package.tracking_number.clone(),
            passed: false,
            mismatches: Vec::new(),
        };

        let row = match client
            .query_opt(
                "SELECT tracking_number, status, current_location FROM packages WHERE id = $1",
                &[&package.id],
            )
            .await
        {
            Ok(Some(row)) => row,
            Ok(None) => {
                check.mismatches.push("missing in destination".to_string());
                return check;
            }
            Err(e) => {
                check.mismatches.push(DatabaseError::from_pg(e).to_string());
                return check;
            }
        };

        let tracking_number: String = row.get(0);
        let status: String = row.get(1);
        let current_location: String = row.get(2);

        if tracking_number != package.tracking_number {
            check.mismatches.push(format!(
                "tracking_number: expected {}, found {}",
                package.tracking_number, tracking_number
            ));
        }
        if status != package.status.as_str() {
            check
                .mismatches
                .push(format!("status: expected {}, found {}", package.status, status));
        }
        if current_location != package.current_location {
            check.mismatches.push(format!(
                "current_location: expected {}, found {}",
                package.current_location, current_location
            ));
        }

        check.passed = check.mismatches.is_empty();
        check
    }
}

async fn count_rows(client: &Client, table: &str) -> Result<u64> {
    // Table names come from the fixed TABLES list, never from input
    let row = client
        .query_one(format!("SELECT COUNT(*) FROM {}", table).as_str(), &[])
        .await
        .map_err(DatabaseError::from_pg)?;
    Ok(row.get::<_, i64>(0) as u64)
}
