//! CLI smoke tests for the docrepo-demo binary

use std::path::PathBuf;
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn run_demo(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_docrepo-demo"))
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("Failed to execute docrepo-demo")
}

/// Config with console logging off and no log file, so stdout only carries
/// what the demo prints.
fn write_config(dir: &TempDir, extra: &str) -> PathBuf {
    let path = dir.path().join("docrepo.yaml");
    let content = format!(
        r#"
home_dir: "{home}"
queue:
  workers: 2
logging:
  default:
    console_level: "off"
    file: ""
    file_level: "off"
{extra}"#,
        home = dir.path().display()
    );
    std::fs::write(&path, content).expect("Failed to write config");
    path
}

#[test]
fn test_cli_help_command() {
    let output = run_demo(&["--help"]);
    assert!(output.status.success(), "Help command should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"), "Should contain usage information");
    assert!(stdout.contains("run"), "Should contain 'run' subcommand");
    assert!(stdout.contains("check"), "Should contain 'check' subcommand");
    assert!(stdout.contains("--config"), "Should mention config option");
    assert!(stdout.contains("--workers"), "Should mention workers option");
}

#[test]
fn test_cli_version_command() {
    let output = run_demo(&["--version"]);
    assert!(output.status.success(), "Version command should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("docrepo-demo"), "Should contain binary name");
    assert!(stdout.contains("0.1.0"));
}

#[test]
fn test_cli_invalid_command() {
    let output = run_demo(&["invalid-command"]);
    assert!(!output.status.success(), "Invalid command should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error") || stderr.contains("unrecognized"),
        "Should report the invalid command: {stderr}"
    );
}

#[test]
fn test_cli_check_valid_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(
        &temp_dir,
        r#"repositories:
  notes:
    container_name: notes
    audit_container: audit-log
"#,
    );

    let output = run_demo(&["--config", config_path.to_str().unwrap(), "check"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "Check should pass: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("Configuration check passed"));
    assert!(stdout.contains("audit-log"), "YAML dump should include repository settings");
}

#[test]
fn test_cli_check_rejects_bad_repository_settings() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(
        &temp_dir,
        r#"repositories:
  notes:
    container_name: notes
    default_page_size: 0
"#,
    );

    let output = run_demo(&["--config", config_path.to_str().unwrap(), "check"]);
    assert!(!output.status.success(), "Zero page size should be rejected");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("notes"), "Should name the repository: {stderr}");
}

#[test]
fn test_cli_invalid_yaml() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("invalid.yaml");
    std::fs::write(&config_path, "invalid: yaml: content: [unclosed")
        .expect("Failed to write file");

    let output = run_demo(&["--config", config_path.to_str().unwrap(), "check"]);
    assert!(!output.status.success(), "Should fail with invalid YAML");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("config"), "Should mention the config: {stderr}");
}

#[test]
fn test_cli_print_config_exits_early() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(&temp_dir, "");

    let output = run_demo(&[
        "--config",
        config_path.to_str().unwrap(),
        "--workers",
        "7",
        "--print-config",
    ]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("workers: 7"), "CLI override should win: {stdout}");
    assert!(!stdout.contains("read back"), "Should not run the demo");
}

#[test]
fn test_cli_run_round_trip() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(
        &temp_dir,
        r#"repositories:
  notes:
    container_name: notes
"#,
    );

    let output = run_demo(&["--config", config_path.to_str().unwrap(), "run"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "Run should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("read back team-b:n1: Note 1"), "{stdout}");
    assert!(stdout.contains("Note 2 (rev 1)"), "queued patch should land: {stdout}");
    assert!(stdout.contains("page 3:"), "five notes over pages of two: {stdout}");
    // 5 creates, 1 patch, 5 deletes
    assert!(
        stdout.contains("remaining notes: 0, audit records: 11"),
        "{stdout}"
    );
}

#[test]
fn test_cli_check_reads_store_section() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = write_config(
        &temp_dir,
        r#"store:
  default_max_item_count: 0
"#,
    );

    let output = run_demo(&["--config", config_path.to_str().unwrap(), "check"]);
    assert!(!output.status.success(), "Zero item count should be rejected");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("default_max_item_count"),
        "Should name the store setting: {stderr}"
    );
}
