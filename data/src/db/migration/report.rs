//! Aggregate run report: JSON file for post-mortems, text for the console

use super::api::ApiResult;
use super::concurrency::ConcurrencyResult;
use super::executor::ExecutionResult;
use super::performance::PerformanceResult;
use super::rollback::RollbackOutcome;
use super::verification::VerificationResult;
use crate::db::{DatabaseError, ErrorKind, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// First error that stopped a run, with the operator hint for its class
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockingError {
    pub kind: ErrorKind,
    pub message: String,
    pub remediation: String,
}

impl BlockingError {
    pub fn from_error(err: &DatabaseError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            remediation: err.remediation().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub timestamp: DateTime<Utc>,
    /// Subcommand that produced the report
    pub command: String,
    pub success: bool,
    pub dry_run: bool,
    pub rolled_back: bool,
    pub execution: Option<ExecutionResult>,
    pub verification: Option<VerificationResult>,
    pub concurrency: Option<ConcurrencyResult>,
    pub performance: Option<PerformanceResult>,
    pub api: Option<ApiResult>,
    /// Rollback started by the orchestrator after a failed verification
    pub rollback: Option<RollbackOutcome>,
    pub blocking_error: Option<BlockingError>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl MigrationReport {
    pub fn new(command: impl Into<String>, dry_run: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            command: command.into(),
            success: false,
            dry_run,
            rolled_back: false,
            execution: None,
            verification: None,
            concurrency: None,
            performance: None,
            api: None,
            rollback: None,
            blocking_error: None,
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Keep the first blocking error; every error lands in `errors`
    pub fn record_error(&mut self, err: &DatabaseError) {
        if self.blocking_error.is_none() {
            self.blocking_error = Some(BlockingError::from_error(err));
        }
        self.errors.push(err.to_string());
    }

    pub fn record_execution(&mut self, execution: ExecutionResult) {
        if self.blocking_error.is_none() {
            self.blocking_error = execution.blocking_error.clone();
        }
        self.errors
            .extend(execution.errors.iter().map(|e| format!("execution: {}", e)));
        self.rolled_back |= execution.rolled_back();
        self.execution = Some(execution);
    }

    /// Compute overall success from every phase that ran
    ///
    /// Phases left as `None` were skipped and do not count against the run.
    pub fn finish(&mut self, started: std::time::Instant) {
        self.collect_phase_errors();

        let execution_ok = self.execution.as_ref().is_none_or(|e| e.success);
        let verification_ok = self.verification.as_ref().is_none_or(|v| v.success);
        let concurrency_ok = self.concurrency.as_ref().is_none_or(|c| c.success);
        let performance_ok = self.performance.as_ref().is_none_or(|p| p.success);
        let api_ok = self.api.as_ref().is_none_or(|a| a.success);
        let rollback_ok = self.rollback.as_ref().is_none_or(|r| r.success);

        self.success = self.blocking_error.is_none()
            && execution_ok
            && verification_ok
            && concurrency_ok
            && performance_ok
            && api_ok
            && rollback_ok
            && !self.rolled_back;
        self.duration_ms = started.elapsed().as_millis() as u64;
    }

    /// Fold each phase's errors into the report under its own class; the
    /// first one becomes the blocking error if nothing blocked earlier
    fn collect_phase_errors(&mut self) {
        let mut phase_errors: Vec<DatabaseError> = Vec::new();
        if let Some(v) = &self.verification {
            phase_errors.extend(v.errors.iter().cloned().map(DatabaseError::Verification));
        }
        if let Some(c) = &self.concurrency {
            phase_errors.extend(c.errors.iter().cloned().map(DatabaseError::Concurrency));
        }
        if let Some(p) = &self.performance {
            phase_errors.extend(p.errors.iter().cloned().map(DatabaseError::Performance));
        }
        if let Some(a) = &self.api {
            phase_errors.extend(a.errors.iter().cloned().map(DatabaseError::Api));
        }
        if let Some(r) = &self.rollback {
            phase_errors.extend(r.errors.iter().cloned().map(DatabaseError::Rollback));
        }

        if self.blocking_error.is_none() {
            self.blocking_error = phase_errors.first().map(BlockingError::from_error);
        }
        self.errors.extend(phase_errors.iter().map(|e| e.to_string()));
    }

    pub fn file_name(&self) -> String {
        format!(
            "migration-report-{}.json",
            self.timestamp.format("%Y%m%d_%H%M%S_%3f")
        )
    }

    /// Write the JSON report into `dir`, creating it if needed
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DatabaseError::Query(format!("Failed to encode report: {}", e)))?;
        std::fs::write(&path, json)?;
        log::info!("Report written to {}", path.display());
        Ok(path)
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "PASS" } else { "FAIL" }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Migration report ({})", self.command)?;
        writeln!(f, "  Timestamp: {}", self.timestamp.to_rfc3339())?;
        writeln!(
            f,
            "  Result: {}{}{}",
            if self.success { "SUCCESS" } else { "FAILED" },
            if self.dry_run { " (dry run)" } else { "" },
            if self.rolled_back { ", rolled back" } else { "" }
        )?;
        writeln!(f, "  Duration: {}ms", self.duration_ms)?;

        match &self.execution {
            Some(execution) => {
                writeln!(
                    f,
                    "  Execution: {} (state: {})",
                    status(execution.success),
                    execution.state
                )?;
                if let Some(counts) = &execution.dry_run_counts {
                    writeln!(f, "    Ready to migrate: {}", counts)?;
                }
                if let Some(counts) = &execution.counts {
                    writeln!(
                        f,
                        "    Migrated: {} in {}ms",
                        counts.as_record_counts(),
                        counts.elapsed_ms
                    )?;
                }
                if let Some(backup) = &execution.backup {
                    writeln!(f, "    Backup: {}", backup.backup_path.display())?;
                }
                if let Some(rollback) = &execution.rollback {
                    writeln!(f, "    Rollback: {}", status(rollback.success))?;
                }
            }
            None if self.command != "verify" => writeln!(f, "  Execution: not run")?,
            None => {}
        }

        match &self.verification {
            Some(v) => {
                writeln!(f, "  Verification: {}", status(v.success))?;
                for count in &v.record_counts {
                    writeln!(
                        f,
                        "    {}: source {}, destination {}",
                        count.table,
                        count.source,
                        count
                            .destination
                            .map(|d| d.to_string())
                            .unwrap_or_else(|| "?".to_string())
                    )?;
                }
                writeln!(
                    f,
                    "    Orphaned records: {}",
                    v.foreign_key_integrity.orphaned_records
                )?;
                writeln!(
                    f,
                    "    Samples: {}/{} passed",
                    v.samples.len() - v.failed_samples(),
                    v.samples.len()
                )?;
            }
            None => writeln!(f, "  Verification: skipped")?,
        }

        match &self.concurrency {
            Some(c) => writeln!(
                f,
                "  Concurrency: {} ({} connections, avg connect {:.1}ms, avg query {:.1}ms)",
                status(c.success),
                c.concurrency,
                c.avg_connection_ms,
                c.avg_query_ms
            )?,
            None => writeln!(f, "  Concurrency: skipped")?,
        }

        match &self.performance {
            Some(p) => {
                writeln!(f, "  Performance: {}", status(p.success))?;
                for timing in &p.operations {
                    writeln!(f, "    {:?}: {:.1}ms", timing.operation, timing.duration_ms)?;
                }
                writeln!(
                    f,
                    "    Pool: {} total, {} idle, {} active",
                    p.pool.total, p.pool.idle, p.pool.active
                )?;
                if let Some(memory) = &p.memory {
                    writeln!(f, "    Memory: {} KiB resident", memory.resident_bytes / 1024)?;
                }
            }
            None => writeln!(f, "  Performance: skipped")?,
        }

        match &self.api {
            Some(a) => {
                writeln!(f, "  API: {}", status(a.success))?;
                for check in &a.checks {
                    writeln!(
                        f,
                        "    GET {}: {}",
                        check.endpoint,
                        check
                            .status
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "no response".to_string())
                    )?;
                }
            }
            None => writeln!(f, "  API: skipped")?,
        }

        if let Some(rollback) = &self.rollback {
            writeln!(f, "  Rollback: {}", status(rollback.success))?;
        }

        if !self.errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for error in &self.errors {
                writeln!(f, "    - {}", error)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migration::verification::ForeignKeyIntegrity;
    use std::time::Instant;
    use tempfile::TempDir;

    #[test]
    fn test_skipped_phases_do_not_fail_run() {
        let mut report = MigrationReport::new("verify", false);
        report.verification = Some(VerificationResult {
            success: true,
            foreign_key_integrity: ForeignKeyIntegrity {
                valid: true,
                orphaned_records: 0,
            },
            ..Default::default()
        });
        report.finish(Instant::now());
        assert!(report.success);
        assert!(report.blocking_error.is_none());

        let text = report.to_string();
        assert!(text.contains("Verification: PASS"));
        assert!(text.contains("Performance: skipped"));
    }

    #[test]
    fn test_failed_phase_sets_blocking_error() {
        let mut report = MigrationReport::new("verify", false);
        report.verification = Some(VerificationResult {
            success: false,
            errors: vec!["1 status update(s) reference missing packages".to_string()],
            ..Default::default()
        });
        report.finish(Instant::now());

        assert!(!report.success);
        let blocking = report.blocking_error.unwrap();
        assert_eq!(blocking.kind, ErrorKind::Verification);
        assert!(blocking.message.contains("missing packages"));
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_phase_errors_keep_their_class() {
        let mut report = MigrationReport::new("verify", false);
        report.performance = Some(PerformanceResult {
            success: false,
            errors: vec!["complex_join exceeded 1000ms".to_string()],
            ..Default::default()
        });
        report.api = Some(ApiResult {
            success: false,
            errors: vec!["GET /api/packages returned 502".to_string()],
            ..Default::default()
        });
        report.finish(Instant::now());

        let blocking = report.blocking_error.unwrap();
        assert_eq!(blocking.kind, ErrorKind::Performance);
        assert!(blocking.message.starts_with("Performance check failed"));
        assert!(blocking.remediation.contains("indexes"));
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[1].starts_with("API check failed"));
    }

    #[test]
    fn test_first_error_wins() {
        let mut report = MigrationReport::new("migrate", false);
        report.record_error(&DatabaseError::Prerequisite("no source".to_string()));
        report.record_error(&DatabaseError::Backup("disk full".to_string()));
        report.finish(Instant::now());

        assert_eq!(report.blocking_error.unwrap().kind, ErrorKind::Prerequisite);
        assert_eq!(report.errors.len(), 2);
        assert!(!report.success);
    }

    #[test]
    fn test_write_to_dir() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("reports");
        let mut report = MigrationReport::new("orchestrate", true);
        report.finish(Instant::now());

        let path = report.write_to_dir(&dir).unwrap();
        assert!(path.starts_with(&dir));
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("migration-report-"));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["command"], "orchestrate");
        assert_eq!(json["dry_run"], true);
        assert!(json["verification"].is_null());
    }
}
