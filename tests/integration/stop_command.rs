use crate::common::*;
use std::time::Duration;

#[tokio::test]
async fn stop_from_second_invocation() {
    let project = TestProject::new(
        r#"
[project]
name = "test-stop"

[[services]]
name = "core"
command = "sleep 300"

[services.restart]
max_attempts = 5
delay_secs = 0

[shutdown]
grace_secs = 5
"#,
    );

    let mut child = project
        .command("start")
        .spawn()
        .expect("failed to start stackrig");
    let group = wait_for_record(&project, "core", Duration::from_secs(10))
        .await
        .expect("core was never recorded");
    assert!(pid_alive(group));

    let status = tokio::time::timeout(Duration::from_secs(30), project.command("stop").status())
        .await
        .expect("stop did not finish in time")
        .unwrap();
    assert!(status.success());

    // The owner exits on its own and does not relaunch the service
    let owner = tokio::time::timeout(Duration::from_secs(20), child.wait())
        .await
        .expect("orchestrator did not exit after stop")
        .unwrap();
    assert!(owner.success());
    assert!(wait_for_pid_exit(group, Duration::from_secs(5)).await);
    assert!(!project.registry_path().exists());
}

#[tokio::test]
async fn stop_without_running_stack_is_a_no_op() {
    let project = TestProject::new(
        r#"
[project]
name = "test-idle"
"#,
    );
    let status = project.command("stop").status().await.unwrap();
    assert!(status.success());
}
