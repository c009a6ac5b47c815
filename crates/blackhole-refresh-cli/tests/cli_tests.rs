//! CLI integration tests for blackhole-refresh.
//!
//! These tests cover argument parsing, help output, and exit codes for
//! failures that happen before any database connection is opened.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

/// Get a command for the blackhole-refresh binary.
fn cmd() -> Command {
    Command::cargo_bin("blackhole-refresh").unwrap()
}

fn yaml_file(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("resume"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--table-name"))
        .stdout(predicate::str::contains("--primary"))
        .stdout(predicate::str::contains("--where"))
        .stdout(predicate::str::contains("--batch-size"))
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--keep-shadow"))
        .stdout(predicate::str::contains("--no-start-up-replication-wait"))
        .stdout(predicate::str::contains("--rows-per-second-cap"))
        .stdout(predicate::str::contains("--start-offset"));
}

#[test]
fn test_resume_subcommand_help() {
    cmd()
        .args(["resume", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--table-name"))
        .stdout(predicate::str::contains("--dry-run").not());
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("blackhole-refresh"));
}

#[test]
fn test_global_flags_listed() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--state-file"))
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--topology-path"))
        .stdout(predicate::str::contains("--cluster"))
        .stdout(predicate::str::contains("--database"))
        .stdout(predicate::str::contains("--lag-query"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_health_check_command_exists() {
    cmd()
        .args(["health-check", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Test connections"));
}

// =============================================================================
// Exit Code Tests - Configuration Errors (Exit Code 2)
// =============================================================================

#[test]
fn test_resume_requires_state_file() {
    cmd()
        .args(["--database", "yelp", "resume", "--table-name", "business"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--state-file is required for resume"));
}

#[test]
fn test_resume_with_missing_state_file() {
    cmd()
        .args([
            "--state-file",
            "no_such_refresh_state.json",
            "--database",
            "yelp",
            "resume",
            "--table-name",
            "business",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("State file not found"));
}

#[test]
fn test_run_without_database_or_config() {
    cmd()
        .args(["run", "--table-name", "business"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--database is required"));
}

#[test]
fn test_run_rejects_unsafe_table_name() {
    cmd()
        .args(["--database", "yelp", "run", "--table-name", "business; DROP"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("plain identifier"));
}

#[test]
fn test_zero_batch_size_in_config() {
    let file = yaml_file(&["table: business", "database: yelp", "batch_size: 0"]);

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("batch_size"));
}

#[test]
fn test_zero_batch_size_flag() {
    cmd()
        .args([
            "--database",
            "yelp",
            "run",
            "--table-name",
            "business",
            "--batch-size",
            "0",
        ])
        .assert()
        .code(2);
}

#[test]
fn test_run_requires_lag_query() {
    cmd()
        .args([
            "--database",
            "yelp",
            "--topology-path",
            "no_such_topology.yaml",
            "run",
            "--table-name",
            "business",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("lag_query"))
        .stderr(predicate::str::contains("cannot read topology file").not());
}

#[test]
fn test_lag_query_from_config_file() {
    let file = yaml_file(&[
        "table: business",
        "database: yelp",
        "topology_path: no_such_topology.yaml",
        "throttle:",
        "  lag_query: SELECT 0",
    ]);

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot read topology file"));
}

#[test]
fn test_lag_query_flag_completes_config_file() {
    let file = yaml_file(&[
        "table: business",
        "database: yelp",
        "topology_path: no_such_topology.yaml",
    ]);

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "--lag-query",
            "SELECT 0",
            "run",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot read topology file"));
}

#[test]
fn test_huge_max_wait_rejected() {
    let file = yaml_file(&[
        "table: business",
        "database: yelp",
        "throttle:",
        "  lag_query: SELECT 0",
        "  max_wait_secs: 100000000000000000000.0",
    ]);

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("throttle.max_wait_secs"));
}

#[test]
fn test_missing_topology_file() {
    cmd()
        .args([
            "--database",
            "yelp",
            "--topology-path",
            "no_such_topology.yaml",
            "--lag-query",
            "SELECT 0",
            "run",
            "--table-name",
            "business",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot read topology file"))
        .stderr(predicate::str::contains("phase=idle"));
}

#[test]
fn test_unknown_cluster_reports_diagnostic() {
    let topology = yaml_file(&[
        "topology:",
        "  - cluster: other_cluster",
        "    replica: master",
        "    entries:",
        "      - host: 127.0.0.1",
        "        user: refresh",
        "        password: secret",
    ]);

    cmd()
        .args([
            "--database",
            "yelp",
            "--topology-path",
            topology.path().to_str().unwrap(),
            "--cluster",
            "refresh_primary",
            "--lag-query",
            "SELECT 0",
            "run",
            "--table-name",
            "business",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cluster 'refresh_primary' not found"))
        .stderr(predicate::str::contains("table=business"))
        .stderr(predicate::str::contains("last_committed_offset=none"));
}

// =============================================================================
// Exit Code Tests - Other Errors (Exit Code 1)
// =============================================================================

#[test]
fn test_missing_config_file_is_io_error() {
    cmd()
        .args(["--config", "nonexistent_refresh.yaml", "run"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("IO error"));
}

#[test]
fn test_invalid_yaml_config() {
    let file = yaml_file(&["invalid: yaml: content: ["]);

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("YAML error"));
}

#[test]
fn test_unknown_subcommand_fails() {
    cmd().arg("validate").assert().failure();
}
