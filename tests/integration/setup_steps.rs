use crate::common::*;
use std::time::Duration;

const CONFIG: &str = r#"
[project]
name = "test-setup"

[[setup]]
name = "install"
kind = "deps"
command = "echo deps >> setup.txt"

[[setup]]
name = "migrate"
kind = "migrations"
command = "echo migrations >> setup.txt"

[[services]]
name = "core"
command = "sleep 300"
"#;

async fn start_and_interrupt(project: &TestProject, flags: &[&str]) {
    let mut child = project
        .command("start")
        .args(flags)
        .spawn()
        .expect("failed to start stackrig");
    assert!(wait_for_record(project, "core", Duration::from_secs(10))
        .await
        .is_some());
    interrupt(&child);
    let status = tokio::time::timeout(Duration::from_secs(20), child.wait())
        .await
        .expect("stackrig did not exit in time")
        .unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn setup_runs_in_order() {
    let project = TestProject::new(CONFIG);
    start_and_interrupt(&project, &[]).await;
    let setup = std::fs::read_to_string(project.dir.path().join("setup.txt")).unwrap();
    assert_eq!(setup.lines().collect::<Vec<_>>(), vec!["deps", "migrations"]);
    assert!(project.log_root().join("current/deps-install.log").exists());
}

#[tokio::test]
async fn skip_flags_skip_setup() {
    let project = TestProject::new(CONFIG);
    start_and_interrupt(&project, &["--skip-deps", "--skip-migrations"]).await;
    assert!(!project.dir.path().join("setup.txt").exists());
}

#[tokio::test]
async fn failing_migration_aborts_before_services() {
    let project = TestProject::new(
        r#"
[project]
name = "test-setup-fail"

[[setup]]
name = "migrate"
kind = "migrations"
command = "echo broken schema; exit 4"

[[services]]
name = "core"
command = "touch core-ran; sleep 300"
"#,
    );
    let output = project.command("start").output().await.unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("setup step `migrate` failed with exit code 4"));
    assert!(project.read_log("migrations-migrate.log").contains("broken schema"));
    assert!(!project.dir.path().join("core-ran").exists());
}
