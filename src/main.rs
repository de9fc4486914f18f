mod cli;
mod logger;

use std::path::Path;

use clap::Parser;
use cli::{Cli, Command, migration_config};
use data::db::{BackupManager, MigrationReport, Orchestrator, OrchestratorConfig};
use data::log::RunLog;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = logger::setup(cli.verbose, &RunLog::new(&cli.log_dir)) {
        eprintln!("Failed to set up logging: {}", e);
    }

    let success = match cli.command {
        Command::Migrate {
            destination,
            paths,
            run,
        } => {
            let orchestrator = Orchestrator::new(
                migration_config(&paths, Some(&run)),
                OrchestratorConfig::default(),
            );
            let report = orchestrator.migrate(destination.database_config()).await;
            finish(&report, &paths.report_dir)
        }
        Command::Orchestrate {
            destination,
            paths,
            run,
            skip_verification,
            checks,
        } => {
            let orchestrator = Orchestrator::new(
                migration_config(&paths, Some(&run)),
                checks.orchestrator_config(skip_verification),
            );
            let report = orchestrator.run(destination.database_config()).await;
            finish(&report, &paths.report_dir)
        }
        Command::Verify {
            destination,
            paths,
            checks,
        } => {
            let orchestrator = Orchestrator::new(
                migration_config(&paths, None),
                checks.orchestrator_config(false),
            );
            let report = orchestrator.verify(destination.database_config()).await;
            finish(&report, &paths.report_dir)
        }
        Command::Backups {
            backup_dir,
            cleanup_days,
        } => list_backups(&BackupManager::new(backup_dir), cleanup_days).await,
    };

    if !success {
        std::process::exit(1);
    }
}

/// Print the report, persist it, and surface the blocking error
fn finish(report: &MigrationReport, report_dir: &Path) -> bool {
    println!("{}", report);

    let written = match report.write_to_dir(report_dir) {
        Ok(path) => {
            println!("Full report: {}", path.display());
            true
        }
        Err(e) => {
            log::error!("Could not write report to {}: {}", report_dir.display(), e);
            false
        }
    };

    if let Some(blocking) = &report.blocking_error {
        eprintln!("Error ({:?}): {}", blocking.kind, blocking.message);
        eprintln!("Hint: {}", blocking.remediation);
    }

    report.success && written
}

async fn list_backups(manager: &BackupManager, cleanup_days: Option<u64>) -> bool {
    if let Some(days) = cleanup_days {
        match manager.cleanup_old_backups(days).await {
            Ok(removed) => log::info!("Removed {} backup(s) older than {} days", removed, days),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!("Hint: {}", e.remediation());
                return false;
            }
        }
    }

    match manager.list_backups().await {
        Ok(backups) if backups.is_empty() => {
            println!("No backups in {}", manager.backup_root().display());
            true
        }
        Ok(backups) => {
            for backup in backups {
                println!(
                    "{}  {:>10} bytes  {} (from {})",
                    backup.timestamp,
                    backup.size_bytes,
                    backup.backup_path.display(),
                    backup.original_path.display()
                );
            }
            true
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Hint: {}", e.remediation());
            false
        }
    }
}
