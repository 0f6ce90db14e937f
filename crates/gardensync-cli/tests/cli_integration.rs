//! CLI Integration Tests
//!
//! These tests verify the CLI commands work end-to-end against a temporary
//! data directory. Nothing here opens a network endpoint; the demos run
//! over the in-process hub.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// Create a CLI command with a temporary data directory
fn cli_cmd(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("gardensync").expect("Failed to find gardensync binary");
    cmd.arg("--data-dir").arg(data_dir.path());
    cmd
}

// ============================================================================
// Info Command Tests
// ============================================================================

#[test]
fn test_info_on_fresh_directory() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("Garden Sync"))
        .stdout(predicate::str::contains("Name: Unnamed device"))
        .stdout(predicate::str::contains("ID: (created on first join)"))
        .stdout(predicate::str::contains("Live sync: off"))
        .stdout(predicate::str::contains("Gardens: none"));
}

#[test]
fn test_info_lists_gardens() {
    let data_dir = TempDir::new().unwrap();
    let gardens = data_dir.path().join("gardens");
    std::fs::create_dir_all(gardens.join("journal")).unwrap();
    std::fs::create_dir_all(gardens.join("recipes")).unwrap();
    std::fs::write(gardens.join("journal").join("today.md"), "# Today").unwrap();

    cli_cmd(&data_dir)
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("Gardens (2):"))
        .stdout(predicate::str::contains("  journal"))
        .stdout(predicate::str::contains("  recipes"));
}

// ============================================================================
// Settings Tests
// ============================================================================

#[test]
fn test_name_persists() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["name", "Kitchen Laptop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Display name set: Kitchen Laptop"));

    cli_cmd(&data_dir)
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("Name: Kitchen Laptop"));
}

#[test]
fn test_blank_name_rejected() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["name", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be empty"));
}

#[test]
fn test_live_flag_roundtrip() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["live", "on"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Live sync enabled."));
    cli_cmd(&data_dir)
        .args(["live", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Live sync: on"));

    cli_cmd(&data_dir).args(["live", "off"]).assert().success();
    cli_cmd(&data_dir)
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("Live sync: off"));
}

#[test]
fn test_invalid_host_preference() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["join", "home", "--prefer-host", "sideways"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid host preference"));
}

// ============================================================================
// Demo Tests
// ============================================================================

#[test]
fn test_demo_files() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["--chunk-size", "16", "demo", "files"])
        .assert()
        .success()
        .stdout(predicate::str::contains("birch received 3 files"))
        .stdout(predicate::str::contains("cedar received 3 files"))
        .stdout(predicate::str::contains("Demo complete."));
}

#[test]
fn test_demo_live() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["demo", "live"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Host elected: alder"))
        .stdout(predicate::str::contains("cedar sees:"))
        .stdout(predicate::str::contains("Birch: watered the seedlings."));
}
