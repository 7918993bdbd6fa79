use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const SECRET: &str = "cli-test-secret-cli-test-secret-0123";

/// Command pointed at a config file inside `dir`
fn ticketgate(dir: &TempDir, toml: &str) -> Command {
    let path = dir.path().join("config.toml");
    fs::write(&path, toml).unwrap();

    let mut cmd = Command::cargo_bin("ticketgate").unwrap();
    cmd.env_remove("TICKETGATE_JWT_SECRET")
        .env_remove("TICKETGATE_LOG_LEVEL")
        .env_remove("TICKETGATE_LOG_FORMAT")
        .arg("--config")
        .arg(path);
    cmd
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("ticketgate").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ticketgate 0.1.0"));
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("ticketgate").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Per-organizer API throttling for the ticketing backend",
        ));
}

#[test]
fn test_cli_missing_subcommand() {
    let mut cmd = Command::cargo_bin("ticketgate").unwrap();
    cmd.assert().failure();
}

#[test]
fn test_cli_plans_table() {
    let dir = TempDir::new().unwrap();
    ticketgate(&dir, "")
        .arg("plans")
        .assert()
        .success()
        .stdout(predicate::str::contains("FREE"))
        .stdout(predicate::str::contains("ENTERPRISE"))
        .stdout(predicate::str::contains("50000"));
}

#[test]
fn test_cli_plans_json_uses_configured_limits() {
    let dir = TempDir::new().unwrap();
    let output = ticketgate(&dir, "[throttle.limits.free]\nminute = 7\nhour = 70\nday = 700\n")
        .args(["plans", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let limits: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(limits["free"]["minute"], 7);
    assert_eq!(limits["basic"]["minute"], 20);
}

#[test]
fn test_cli_check_config_ok() {
    let dir = TempDir::new().unwrap();
    ticketgate(
        &dir,
        "[[organizers]]\nid = \"org_1\"\nname = \"One\"\nplan = \"BASIC\"\n",
    )
    .arg("check-config")
    .assert()
    .success()
    .stdout(predicate::str::contains("Configuration OK"))
    .stdout(predicate::str::contains("organizers:   1"));
}

#[test]
fn test_cli_check_config_invalid() {
    let dir = TempDir::new().unwrap();
    ticketgate(&dir, "[logging]\nlevel = \"shouting\"\n")
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid log level"));
}

#[test]
fn test_cli_issue_token_requires_secret() {
    let dir = TempDir::new().unwrap();
    ticketgate(&dir, "")
        .args(["issue-token", "org_1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No JWT secret configured"));
}

#[test]
fn test_cli_issue_token_rejects_huge_ttl() {
    let dir = TempDir::new().unwrap();
    let config = format!("[auth]\njwt_secret = \"{}\"\n", SECRET);

    ticketgate(&dir, &config)
        .args(["issue-token", "org_1", "--ttl-secs", "9223372036854775807"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Token lifetime out of range"));

    // Fits a Duration but not the calendar
    ticketgate(&dir, &config)
        .args(["issue-token", "org_1", "--ttl-secs", "9000000000000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to issue token"));
}

#[test]
fn test_cli_issue_token() {
    let dir = TempDir::new().unwrap();
    let output = ticketgate(&dir, &format!("[auth]\njwt_secret = \"{}\"\n", SECRET))
        .args(["issue-token", "org_1", "--ttl-secs", "60"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let token = String::from_utf8(output.stdout).unwrap();
    let claims = ticketgate::guard::OrganizerTokens::from_secret(SECRET)
        .verify(token.trim())
        .unwrap();
    assert_eq!(claims.organizer_id, "org_1");
}
