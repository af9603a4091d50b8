use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn convoy() -> Command {
    Command::cargo_bin("convoy").unwrap()
}

const BLUEPRINT: &str = r#"
name = "demo"

[[services]]
kind = "appserver"
platform = "linux"
run_dir = "/srv/app"
launch = "nohup ./bin/app > console 2>&1 & echo $! > {{pid_file}}"
pid_file = "{{run_dir}}/app.pid"

[[resources]]
id = "web-1"
kind = "appserver"
host = "10.0.0.5"
platform = "linux"
port = 8080
"#;

#[test]
fn test_help_and_version() {
    convoy()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Distributed deployment orchestrator"));

    convoy().arg("--version").assert().success();
}

#[test]
fn test_validate_prints_summary() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("convoy.toml"), BLUEPRINT).unwrap();

    convoy()
        .current_dir(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("web-1"))
        .stdout(predicate::str::contains("appserver"));
}

#[test]
fn test_validate_with_explicit_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("other.toml");
    fs::write(&path, BLUEPRINT).unwrap();

    convoy()
        .arg("validate")
        .arg("--blueprint")
        .arg(&path)
        .assert()
        .success();
}

#[test]
fn test_validate_rejects_unknown_kind() {
    let dir = TempDir::new().unwrap();
    let broken = BLUEPRINT.replace("kind = \"appserver\"\nhost", "kind = \"mystery\"\nhost");
    fs::write(dir.path().join("convoy.toml"), broken).unwrap();

    convoy()
        .current_dir(dir.path())
        .arg("validate")
        .assert()
        .failure();
}

#[test]
fn test_missing_blueprint_fails() {
    let dir = TempDir::new().unwrap();
    convoy()
        .current_dir(dir.path())
        .arg("validate")
        .assert()
        .failure();
}
