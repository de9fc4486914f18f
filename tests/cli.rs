use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_trackship-migrate"))
        .args(args)
        .current_dir(dir)
        .env_remove("DATABASE_URL")
        .env_remove("API_BASE_URL")
        .env_remove("SOURCE_DB_PATH")
        .env_remove("LOG_LEVEL")
        .output()
        .expect("failed to execute trackship-migrate binary")
}

#[test]
fn help_lists_migration_flags() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &["migrate-orchestrate", "--help"]);
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    for flag in [
        "--connection-string",
        "--dry-run",
        "--skip-backup",
        "--skip-verification",
        "--no-auto-rollback",
        "--skip-api-tests",
        "--skip-performance-tests",
        "--concurrent-connections",
        "--verbose",
    ] {
        assert!(stdout.contains(flag), "help output is missing {}", flag);
    }
}

#[test]
fn rejects_unknown_flag() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &["migrate", "--no-such-flag"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("--no-such-flag"));
}

#[test]
fn missing_source_exits_nonzero_with_report() {
    let dir = TempDir::new().unwrap();
    let output = run(
        dir.path(),
        &[
            "migrate",
            "--connection-string",
            "postgres://app:pw@127.0.0.1:1/tracker",
            "--source",
            "missing.db",
            "--report-dir",
            "reports",
        ],
    );
    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("Hint:"));

    let reports: Vec<_> = fs::read_dir(dir.path().join("reports"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(reports.len(), 1);

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&reports[0]).unwrap()).unwrap();
    assert_eq!(report["success"], false);
    assert_eq!(report["command"], "migrate");
    assert_eq!(report["blocking_error"]["kind"], "prerequisite");
    assert_eq!(report["execution"]["state"], "failed");
}

#[test]
fn missing_connection_string_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &["verify", "--skip-api-tests"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn backups_lists_empty_directory() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &["backups", "--backup-dir", "nowhere"]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("No backups"));
}
