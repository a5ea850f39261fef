use crate::common::*;
use std::time::Duration;

#[tokio::test]
async fn start_stop_lifecycle() {
    let port = free_port();
    let project = TestProject::new(&format!(
        r#"
[project]
name = "test-lifecycle"

[[services]]
name = "web"
command = "sleep 300 & echo $! > sleeper.pid; exec python3 -m http.server {port}"

[services.health]
type = "tcp"
port = {port}
timeout = 15

[[services]]
name = "worker"
command = "sleep 300"
"#
    ));

    let mut child = project
        .command("start")
        .spawn()
        .expect("failed to start stackrig");

    assert!(
        wait_for_port(port, Duration::from_secs(15)).await,
        "Service did not become reachable on port {port}"
    );
    let sleeper_file = project.dir.path().join("sleeper.pid");
    assert!(wait_for_file(&sleeper_file, Duration::from_secs(5)).await);
    assert!(wait_for_record(&project, "web", Duration::from_secs(5)).await.is_some());
    assert!(wait_for_record(&project, "worker", Duration::from_secs(10)).await.is_some());

    interrupt(&child);

    let status = tokio::time::timeout(Duration::from_secs(20), child.wait())
        .await
        .expect("stackrig did not exit in time")
        .expect("failed to wait on stackrig");
    assert!(status.success(), "interrupt should exit 0, got {status:?}");

    assert!(
        wait_for_port_release(port, Duration::from_secs(5)).await,
        "Port {port} was not released after stop"
    );

    let sleeper: i32 = std::fs::read_to_string(&sleeper_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(
        wait_for_pid_exit(sleeper, Duration::from_secs(5)).await,
        "grandchild {sleeper} survived shutdown"
    );
    assert!(
        !project.registry_path().exists(),
        "registry file should be removed after a clean shutdown"
    );
}

#[tokio::test]
async fn disabled_optional_service_is_not_launched() {
    let project = TestProject::new(
        r#"
[project]
name = "test-disabled"

[[services]]
name = "core"
command = "sleep 300"

[[services]]
name = "sentinels"
command = "touch sentinels-ran; sleep 300"
optional = true
"#,
    );

    let mut child = project
        .command("start")
        .arg("--no-sentinels")
        .stdout(std::process::Stdio::piped())
        .spawn()
        .expect("failed to start stackrig");

    assert!(wait_for_record(&project, "core", Duration::from_secs(10))
        .await
        .is_some());
    // Summary is printed once the last enabled service passes its gate
    tokio::time::sleep(Duration::from_millis(500)).await;
    interrupt(&child);
    let output = tokio::time::timeout(Duration::from_secs(20), child.wait_with_output())
        .await
        .expect("stackrig did not exit in time")
        .unwrap();

    assert!(output.status.success());
    assert!(!project.dir.path().join("sentinels-ran").exists());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("disabled"), "summary missing: {stdout}");
}
