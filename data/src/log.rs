//! Per-run log file
//!
//! Each run writes to `<dir>/trackship-migrate-current.log`. The previous
//! run's file is kept next to it as `trackship-migrate-previous.log` so a
//! failed migration can be compared with the retry that followed it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_LOG_DIR: &str = "logs";

const CURRENT_FILE: &str = "trackship-migrate-current.log";
const PREVIOUS_FILE: &str = "trackship-migrate-previous.log";

#[derive(Debug, Clone)]
pub struct RunLog {
    dir: PathBuf,
}

impl RunLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join(CURRENT_FILE)
    }

    pub fn previous_path(&self) -> PathBuf {
        self.dir.join(PREVIOUS_FILE)
    }

    /// Create the directory, move the last run's log aside and open a fresh
    /// file for this run
    pub fn open(&self) -> Result<fs::File, LogError> {
        fs::create_dir_all(&self.dir).map_err(|source| LogError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let current = self.current_path();
        if current.exists() {
            let previous = self.previous_path();
            fs::rename(&current, &previous).map_err(|source| LogError::Io {
                path: previous,
                source,
            })?;
        }

        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&current)
            .map_err(|source| LogError::Io {
                path: current,
                source,
            })
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_DIR)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Log file {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("A logger is already installed: {0}")]
    Install(#[from] log::SetLoggerError),
    #[error("Unknown log level {0:?} (expected off, error, warn, info, debug or trace)")]
    Level(String),
}
