//! Progress reporting for migration operations
//!
//! The executor reports phase transitions through a plain callback so the
//! pipeline never writes to the console itself. `ProgressTracker` logs row
//! throughput with ETA estimation for the long bulk-write step.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of forward steps between `NotStarted` and `Succeeded`
pub const TOTAL_STEPS: u8 = 6;

/// States of the migration executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    NotStarted,
    ValidatingPrerequisites,
    CreatingBackup,
    SettingUpSchema,
    CreatingIndexes,
    MigratingData,
    VerifyingIntegrity,
    Succeeded,
    Failed,
    RollingBack,
    RolledBack,
}

impl MigrationPhase {
    /// 1-based position among the forward steps, if this is one
    pub fn step(&self) -> Option<u8> {
        match self {
            MigrationPhase::ValidatingPrerequisites => Some(1),
            MigrationPhase::CreatingBackup => Some(2),
            MigrationPhase::SettingUpSchema => Some(3),
            MigrationPhase::CreatingIndexes => Some(4),
            MigrationPhase::MigratingData => Some(5),
            MigrationPhase::VerifyingIntegrity => Some(6),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationPhase::Succeeded | MigrationPhase::Failed | MigrationPhase::RolledBack
        )
    }

    /// Whether the executor may move from `self` to `next`
    pub fn can_transition_to(&self, next: MigrationPhase) -> bool {
        use MigrationPhase::*;
        match (self, next) {
            (NotStarted, ValidatingPrerequisites)
            | (ValidatingPrerequisites, CreatingBackup)
            | (CreatingBackup, SettingUpSchema)
            | (SettingUpSchema, CreatingIndexes)
            | (CreatingIndexes, MigratingData)
            | (MigratingData, VerifyingIntegrity)
            | (VerifyingIntegrity, Succeeded) => true,
            // Dry runs stop once schema and export are validated
            (SettingUpSchema, Succeeded) => true,
            (Failed, RollingBack) => true,
            (RollingBack, RolledBack) | (RollingBack, Failed) => true,
            (current, Failed) => !current.is_terminal() && *current != RollingBack,
            _ => false,
        }
    }

    /// Monotonic completion percentage for this state
    pub fn percent(&self) -> u8 {
        match self {
            MigrationPhase::NotStarted => 0,
            MigrationPhase::Succeeded => 100,
            phase => phase
                .step()
                .map(|step| ((step as u32 * 100) / TOTAL_STEPS as u32) as u8)
                .unwrap_or(0),
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MigrationPhase::NotStarted => "not started",
            MigrationPhase::ValidatingPrerequisites => "validating prerequisites",
            MigrationPhase::CreatingBackup => "creating backup",
            MigrationPhase::SettingUpSchema => "setting up schema",
            MigrationPhase::CreatingIndexes => "creating indexes",
            MigrationPhase::MigratingData => "migrating data",
            MigrationPhase::VerifyingIntegrity => "verifying integrity",
            MigrationPhase::Succeeded => "succeeded",
            MigrationPhase::Failed => "failed",
            MigrationPhase::RollingBack => "rolling back",
            MigrationPhase::RolledBack => "rolled back",
        };
        f.write_str(label)
    }
}

/// `(phase, percent)` notification invoked on every executor transition
pub type ProgressCallback = Arc<dyn Fn(MigrationPhase, u8) + Send + Sync>;

/// Callback that logs each transition at info level
pub fn log_progress() -> ProgressCallback {
    Arc::new(|phase, percent| {
        log::info!("[{:>3}%] {}", percent, phase);
    })
}

/// Tracks and logs row throughput with ETA estimation
pub struct ProgressTracker {
    total_items: usize,
    processed_items: usize,
    start_time: Instant,
    last_update: Instant,
    label: String,
}

impl ProgressTracker {
    /// Create a new progress tracker
    pub fn new(total_items: usize, label: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            total_items,
            processed_items: 0,
            start_time: now,
            last_update: now,
            label: label.into(),
        }
    }

    /// Update progress with newly processed count
    pub fn update(&mut self, processed_count: usize) {
        self.processed_items += processed_count;

        let now = Instant::now();
        // Only update display every 500ms to avoid spam
        if now.duration_since(self.last_update) < Duration::from_millis(500) {
            return;
        }

        self.last_update = now;
        self.display_progress();
    }

    pub fn processed(&self) -> usize {
        self.processed_items
    }

    fn display_progress(&self) {
        if self.total_items == 0 {
            return;
        }

        let elapsed = self.start_time.elapsed();
        let percent = (self.processed_items as f64 / self.total_items as f64) * 100.0;

        let eta = if self.processed_items > 0 {
            let rate = self.processed_items as f64 / elapsed.as_secs_f64();
            let remaining = self.total_items.saturating_sub(self.processed_items);
            format_duration(Duration::from_secs_f64(remaining as f64 / rate))
        } else {
            "calculating...".to_string()
        };

        log::info!(
            "{}: {}/{} ({:.1}%) - Elapsed: {} - ETA: {}",
            self.label,
            self.processed_items,
            self.total_items,
            percent,
            format_duration(elapsed),
            eta
        );
    }

    /// Log final stats
    pub fn finish(&self) {
        log::info!(
            "{}: Completed {} items in {}",
            self.label,
            self.processed_items,
            format_duration(self.start_time.elapsed())
        );
    }
}

/// Format duration as human-readable string
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
