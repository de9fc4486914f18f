//! Best-effort rollback of a failed or untrusted migration
//!
//! Two independent steps, both always attempted:
//! 1. Drop the pipeline's destination tables (children first) in one transaction
//! 2. Restore the source file from its backup, when one exists

use super::backup::{BackupManager, BackupMetadata};
use crate::db::{DatabaseError, DestinationPool, Result};
use serde::Serialize;

/// Reverse dependency order
const DROP_ORDER: [&str; 3] = ["status_updates", "contact_submissions", "packages"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackOutcome {
    /// Every attempted step succeeded
    pub success: bool,
    pub tables_dropped: bool,
    /// `None` when no backup was available to restore
    pub backup_restored: Option<bool>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RollbackManager {
    backups: BackupManager,
}

impl RollbackManager {
    pub fn new(backups: BackupManager) -> Self {
        Self { backups }
    }

    pub async fn perform_rollback(
        &self,
        backup: Option<&BackupMetadata>,
        pool: &DestinationPool,
    ) -> RollbackOutcome {
        log::warn!("Rolling back migration...");
        let mut outcome = RollbackOutcome::default();

        match self.drop_destination_tables(pool).await {
            Ok(()) => outcome.tables_dropped = true,
            Err(e) => {
                log::error!("Failed to drop destination tables: {}", e);
                outcome
                    .errors
                    .push(format!("Failed to drop destination tables: {}", e));
            }
        }

        if let Some(backup) = backup {
            match self.backups.restore_from_backup(backup).await {
                Ok(()) => outcome.backup_restored = Some(true),
                Err(e) => {
                    log::error!("Failed to restore backup: {}", e);
                    outcome.backup_restored = Some(false);
                    outcome.errors.push(format!("Failed to restore backup: {}", e));
                }
            }
        } else {
            log::warn!("No backup available; source file left as is");
        }

        outcome.success = outcome.tables_dropped && outcome.backup_restored != Some(false);
        if outcome.success {
            log::info!("Rollback completed");
        } else {
            log::error!("Rollback incomplete: {}", outcome.errors.join("; "));
        }
        outcome
    }

    /// Drop every pipeline table with CASCADE inside one transaction
    pub async fn drop_destination_tables(&self, pool: &DestinationPool) -> Result<()> {
        let mut client = pool.get().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| DatabaseError::Rollback(format!("Failed to start transaction: {}", e)))?;

        for table in DROP_ORDER {
            let statement = format!("DROP TABLE IF EXISTS {} CASCADE", table);
            if let Err(e) = tx.batch_execute(&statement).await {
                if let Err(rollback_err) = tx.rollback().await {
                    log::warn!("Drop transaction rollback failed: {}", rollback_err);
                }
                return Err(DatabaseError::Rollback(format!("{}: {}", table, e)));
            }
            log::debug!("Dropped table {}", table);
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Rollback(format!("Failed to commit drops: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_children_dropped_before_parents() {
        let packages = DROP_ORDER.iter().position(|t| *t == "packages").unwrap();
        let updates = DROP_ORDER.iter().position(|t| *t == "status_updates").unwrap();
        assert!(updates < packages);
    }

    #[tokio::test]
    async fn test_restore_attempted_when_drop_fails() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("packages.db");
        std::fs::write(&db_path, b"before migration").unwrap();

        let backups = BackupManager::new(temp_dir.path().join("backups"));
        let backup = backups.create_backup(&db_path, false).await.unwrap().unwrap();
        std::fs::write(&db_path, b"after migration").unwrap();

        let config = DatabaseConfig::new("postgres://app:pw@127.0.0.1:1/tracker")
            .with_connect_timeout(Duration::from_millis(200));
        let pool = DestinationPool::new(config).unwrap();

        let outcome = RollbackManager::new(backups)
            .perform_rollback(Some(&backup), &pool)
            .await;

        assert!(!outcome.success);
        assert!(!outcome.tables_dropped);
        assert_eq!(outcome.backup_restored, Some(true));
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(std::fs::read(&db_path).unwrap(), b"before migration");
    }
}
