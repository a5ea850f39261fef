use crate::common::*;
use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn validate_reports_valid_config() {
    let project = TestProject::new(
        r#"
[project]
name = "test"

[[services]]
name = "api"
command = "echo hi"
"#,
    );
    Command::cargo_bin("stackrig")
        .unwrap()
        .args(["-f", project.config_path.to_str().unwrap(), "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid (1 services"));
}

#[test]
fn validate_rejects_duplicate_names() {
    let project = TestProject::new(
        r#"
[project]
name = "test"

[[services]]
name = "api"
command = "echo a"

[[services]]
name = "api"
command = "echo b"
"#,
    );
    Command::cargo_bin("stackrig")
        .unwrap()
        .args(["-f", project.config_path.to_str().unwrap(), "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("api"));
}

#[test]
fn disabling_required_service_is_refused() {
    let project = TestProject::new(
        r#"
[project]
name = "test"

[[services]]
name = "core"
command = "sleep 300"
"#,
    );
    Command::cargo_bin("stackrig")
        .unwrap()
        .args(["-f", project.config_path.to_str().unwrap(), "start", "--no-core"])
        .env("STACKRIG_LOG_DIR", project.log_root())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not optional"));
}

#[test]
fn missing_prerequisite_is_fatal() {
    let project = TestProject::new(
        r#"
prerequisites = ["stackrig-definitely-not-installed"]

[project]
name = "test"
"#,
    );
    Command::cargo_bin("stackrig")
        .unwrap()
        .args(["-f", project.config_path.to_str().unwrap(), "start"])
        .env("STACKRIG_LOG_DIR", project.log_root())
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "missing prerequisites: stackrig-definitely-not-installed",
        ));
}

#[test]
fn completions_reference_binary() {
    Command::cargo_bin("stackrig")
        .unwrap()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stackrig"));
}
