use crate::common::*;
use std::time::Duration;

#[tokio::test]
async fn crash_loop_during_startup_is_fatal() {
    let port = free_port();
    let project = TestProject::new(&format!(
        r#"
[project]
name = "test-crash"

[[services]]
name = "crasher"
command = "echo started; exit 3"

[services.restart]
max_attempts = 2
delay_secs = 0

[services.health]
type = "tcp"
port = {port}
timeout = 30
"#
    ));

    let child = project
        .command("start")
        .stderr(std::process::Stdio::piped())
        .spawn()
        .expect("failed to start stackrig");

    let output = tokio::time::timeout(Duration::from_secs(20), child.wait_with_output())
        .await
        .expect("stackrig did not give up in time")
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("gave up after 3 launches"),
        "unexpected stderr: {stderr}"
    );
    // Each relaunch rotates the previous log aside
    let run_dir = project.log_root().join("current");
    let launches: usize = std::fs::read_dir(&run_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("crasher.log"))
        .map(|e| {
            std::fs::read_to_string(e.path())
                .unwrap_or_default()
                .matches("started")
                .count()
        })
        .sum();
    assert_eq!(launches, 3);
}

#[tokio::test]
async fn crash_after_startup_restarts_without_stopping_peers() {
    let project = TestProject::new(
        r#"
[project]
name = "test-restart"

[[services]]
name = "steady"
command = "sleep 300"

[[services]]
name = "flaky"
command = "echo tick >> ticks.txt; sleep 1; exit 1"

[services.restart]
max_attempts = 2
delay_secs = 0
"#,
    );

    let mut child = project
        .command("start")
        .spawn()
        .expect("failed to start stackrig");

    // 3 launches of about a second each, then give up
    tokio::time::sleep(Duration::from_secs(5)).await;
    let ticks = std::fs::read_to_string(project.dir.path().join("ticks.txt")).unwrap_or_default();
    assert_eq!(ticks.lines().count(), 3);

    assert!(child.try_wait().unwrap().is_none(), "peers should keep running");

    interrupt(&child);
    let status = tokio::time::timeout(Duration::from_secs(20), child.wait())
        .await
        .expect("stackrig did not exit in time")
        .unwrap();
    assert!(status.success());
}
