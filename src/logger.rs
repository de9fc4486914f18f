use std::str::FromStr;

use chrono::Local;
use data::log::{LogError, RunLog};
use log::LevelFilter;

/// Overrides the default level when `--verbose` is not given
const LEVEL_ENV: &str = "LOG_LEVEL";

/// Log to stderr and to the per-run file under `run_log`
///
/// `verbose` raises the crate's own modules to debug; dependencies stay at
/// warn so driver chatter does not drown the pipeline's output.
pub fn setup(verbose: bool, run_log: &RunLog) -> Result<(), LogError> {
    let level = pipeline_level(verbose, std::env::var(LEVEL_ENV).ok().as_deref())?;

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{:>5}] {}: {}",
                Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(LevelFilter::Warn)
        .level_for("data", level)
        .level_for("trackship_migrate", level)
        .chain(std::io::stderr())
        .chain(run_log.open()?)
        .apply()?;

    log::debug!("Writing run log to {}", run_log.current_path().display());
    Ok(())
}

fn pipeline_level(verbose: bool, requested: Option<&str>) -> Result<LevelFilter, LogError> {
    if verbose {
        return Ok(LevelFilter::Debug);
    }
    match requested {
        Some(value) => {
            LevelFilter::from_str(value.trim()).map_err(|_| LogError::Level(value.to_string()))
        }
        None => Ok(LevelFilter::Info),
    }
}
