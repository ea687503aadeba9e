//! Fast CLI tests using assert_cmd.
//! These test the binary directly without needing a Docker daemon: every
//! case here fails validation before a connection is attempted.

#![allow(deprecated)] // assert_cmd::Command::cargo_bin is deprecated but works fine

use assert_cmd::Command;
use predicates::prelude::*;

fn hugodev(home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("hugodev").unwrap();
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_flag() {
    let home = tempfile::tempdir().unwrap();
    hugodev(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Hugo development container orchestrator"))
        .stdout(predicate::str::contains("launch-server"));
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    hugodev(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_subcommand_help() {
    let home = tempfile::tempdir().unwrap();
    for subcmd in &["launch-server", "pull-image", "build-image", "config"] {
        hugodev(home.path())
            .args([subcmd, "--help"])
            .assert()
            .success()
            .stdout(predicate::str::is_empty().not());
    }
}

#[test]
fn test_launch_server_help_lists_flags() {
    let home = tempfile::tempdir().unwrap();
    hugodev(home.path())
        .args(["launch-server", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--watch-dir"))
        .stdout(predicate::str::contains("--pull-latest"))
        .stdout(predicate::str::contains("--mount-toml"));
}

#[test]
fn test_no_subcommand_fails() {
    let home = tempfile::tempdir().unwrap();
    hugodev(home.path()).assert().failure();
}

#[test]
fn test_unknown_subcommand() {
    let home = tempfile::tempdir().unwrap();
    hugodev(home.path())
        .arg("nonexistent-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_launch_server_missing_watch_dir() {
    let home = tempfile::tempdir().unwrap();
    let missing = home.path().join("no-such-site");
    hugodev(home.path())
        .args(["launch-server", "--watch-dir"])
        .arg(&missing)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_launch_server_rejects_zero_port() {
    let home = tempfile::tempdir().unwrap();
    hugodev(home.path())
        .args(["launch-server", "--host-port", "0", "--watch-dir"])
        .arg(home.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("host port"));
}

#[test]
fn test_launch_server_rejects_non_numeric_port() {
    let home = tempfile::tempdir().unwrap();
    hugodev(home.path())
        .args(["launch-server", "--host-port", "http"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_pull_image_unknown_env() {
    let home = tempfile::tempdir().unwrap();
    hugodev(home.path())
        .args(["pull-image", "--env", "staging"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown environment 'staging'"));
}

#[test]
fn test_pull_image_requires_env() {
    let home = tempfile::tempdir().unwrap();
    hugodev(home.path())
        .arg("pull-image")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--env"));
}

#[test]
fn test_build_image_unknown_env() {
    let home = tempfile::tempdir().unwrap();
    hugodev(home.path())
        .args(["build-image", "prod"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown environment"));
}

#[test]
fn test_build_image_without_dockerfile() {
    let home = tempfile::tempdir().unwrap();
    let site = tempfile::tempdir().unwrap();
    hugodev(home.path())
        .current_dir(site.path())
        .args(["build-image", "author-dev"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Can't find a Dockerfile"));
}

#[test]
fn test_build_image_without_stage() {
    let home = tempfile::tempdir().unwrap();
    let site = tempfile::tempdir().unwrap();
    std::fs::write(site.path().join("Dockerfile"), "FROM alpine\nRUN true\n").unwrap();
    hugodev(home.path())
        .current_dir(site.path())
        .args(["build-image", "admin-dev"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no branch found in Dockerfile for stage 'dev'"));
}

#[test]
fn test_config_shows_defaults() {
    let home = tempfile::tempdir().unwrap();
    hugodev(home.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("not created yet"))
        .stdout(predicate::str::contains("[server]"))
        .stdout(predicate::str::contains("debounce_ms"));
}
