//! Backup management for safe migration operations
//!
//! Creates timestamped copies of the source database before anything
//! destructive happens and restores them during rollback.

use crate::db::{DatabaseError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;

const BACKUP_PREFIX: &str = "backup-";

/// Manifest describing one backup copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Timestamp when backup was created (`YYYYmmdd_HHMMSS_mmm`)
    pub timestamp: String,
    /// File that was copied
    pub original_path: PathBuf,
    /// Location of the copy
    pub backup_path: PathBuf,
    /// File size in bytes
    pub size_bytes: u64,
}

impl BackupMetadata {
    fn manifest_path(&self) -> PathBuf {
        self.backup_path.with_extension("json")
    }
}

/// Creates and restores byte-for-byte backups with manifest tracking
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_root: PathBuf,
}

impl BackupManager {
    /// Create a new BackupManager with specified backup root directory
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        Self {
            backup_root: backup_root.into(),
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Copy the source database into the backup directory
    ///
    /// Returns `None` when `skip` is set; the caller then has nothing to roll
    /// back to. The copy is checked by size before the manifest is written.
    pub async fn create_backup(&self, source_path: &Path, skip: bool) -> Result<Option<BackupMetadata>> {
        if skip {
            log::warn!("Skipping backup: rollback will not be able to restore the source");
            return Ok(None);
        }

        let source_size = fs::metadata(source_path)
            .await
            .map_err(|e| {
                DatabaseError::Backup(format!(
                    "Cannot read source {}: {}",
                    source_path.display(),
                    e
                ))
            })?
            .len();

        fs::create_dir_all(&self.backup_root).await.map_err(|e| {
            DatabaseError::Backup(format!(
                "Failed to create backup directory {}: {}",
                self.backup_root.display(),
                e
            ))
        })?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let backup_path = self.unused_backup_path(&timestamp).await;

        log::info!(
            "Backing up {} -> {}",
            source_path.display(),
            backup_path.display()
        );

        fs::copy(source_path, &backup_path).await.map_err(|e| {
            DatabaseError::Backup(format!("Failed to copy source database: {}", e))
        })?;

        let backup_size = fs::metadata(&backup_path).await?.len();
        if backup_size != source_size {
            return Err(DatabaseError::BackupVerificationFailed {
                source_bytes: source_size,
                backup_bytes: backup_size,
            });
        }

        let metadata = BackupMetadata {
            timestamp,
            original_path: source_path.to_path_buf(),
            backup_path,
            size_bytes: backup_size,
        };

        let manifest_json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| DatabaseError::Backup(format!("Failed to encode manifest: {}", e)))?;
        fs::write(metadata.manifest_path(), manifest_json).await?;

        log::info!("Backup created: {} bytes", backup_size);
        Ok(Some(metadata))
    }

    async fn unused_backup_path(&self, timestamp: &str) -> PathBuf {
        let mut candidate = self.backup_root.join(format!("{}{}.db", BACKUP_PREFIX, timestamp));
        let mut n = 1;
        while fs::try_exists(&candidate).await.unwrap_or(false) {
            candidate = self
                .backup_root
                .join(format!("{}{}_{}.db", BACKUP_PREFIX, timestamp, n));
            n += 1;
        }
        candidate
    }

    /// Copy a backup back over the live source path
    ///
    /// Parent directories of the original path are recreated if needed.
    pub async fn restore_from_backup(&self, backup: &BackupMetadata) -> Result<()> {
        log::info!("Restoring from backup: {}", backup.backup_path.display());

        if !fs::try_exists(&backup.backup_path).await.unwrap_or(false) {
            return Err(DatabaseError::Backup(format!(
                "Backup file not found: {}",
                backup.backup_path.display()
            )));
        }

        if let Some(parent) = backup.original_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::copy(&backup.backup_path, &backup.original_path)
            .await
            .map_err(|e| DatabaseError::Backup(format!("Failed to restore backup: {}", e)))?;

        log::info!(
            "Restored: {} -> {}",
            backup.backup_path.display(),
            backup.original_path.display()
        );
        Ok(())
    }

    /// Load backup metadata from its manifest file
    pub async fn load_backup_metadata(&self, manifest_path: &Path) -> Result<BackupMetadata> {
        let manifest_json = fs::read_to_string(manifest_path).await?;
        serde_json::from_str(&manifest_json)
            .map_err(|e| DatabaseError::Backup(format!("Invalid backup manifest: {}", e)))
    }

    /// List all available backups, newest first
    pub async fn list_backups(&self) -> Result<Vec<BackupMetadata>> {
        if !fs::try_exists(&self.backup_root).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        let mut entries = fs::read_dir(&self.backup_root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_manifest = path.extension().is_some_and(|ext| ext == "json")
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(BACKUP_PREFIX));
            if !is_manifest {
                continue;
            }

            match self.load_backup_metadata(&path).await {
                Ok(metadata) => backups.push(metadata),
                Err(e) => log::warn!("Ignoring unreadable manifest {}: {}", path.display(), e),
            }
        }

        backups.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.backup_path.cmp(&a.backup_path))
        });
        Ok(backups)
    }

    /// Remove backups older than the retention period
    pub async fn cleanup_old_backups(&self, retention_days: u64) -> Result<usize> {
        let now = SystemTime::now();
        let retention = Duration::from_secs(retention_days * 24 * 3600);
        let mut removed_count = 0;

        for backup in self.list_backups().await? {
            let Ok(metadata) = fs::metadata(&backup.backup_path).await else {
                continue;
            };
            let Ok(age) = metadata.modified().and_then(|m| {
                now.duration_since(m)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            }) else {
                continue;
            };

            if age > retention {
                log::info!("Removing old backup: {}", backup.timestamp);
                fs::remove_file(&backup.backup_path).await?;
                fs::remove_file(backup.manifest_path()).await?;
                removed_count += 1;
            }
        }

        if removed_count > 0 {
            log::info!("Cleaned up {} old backup(s)", removed_count);
        }
        Ok(removed_count)
    }
}
