use crate::common::*;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A `docker` stand-in that records its arguments, one call per line.
fn fake_docker(project: &TestProject) -> (PathBuf, PathBuf) {
    let bin = project.dir.path().join("fakebin");
    std::fs::create_dir(&bin).unwrap();
    let calls = project.dir.path().join("docker-calls.txt");
    let script = bin.join("docker");
    std::fs::write(
        &script,
        format!("#!/bin/sh\necho \"$*\" >> '{}'\n", calls.display()),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    (bin, calls)
}

fn path_with(bin: &Path) -> String {
    format!("{}:{}", bin.display(), std::env::var("PATH").unwrap_or_default())
}

const INFRA_CONFIG: &str = r#"
[project]
name = "test-infra"

[infra]
compose_file = "docker-compose.yml"

[[services]]
name = "core"
command = "sleep 300"
"#;

async fn run_with_infra(flags: &[&str]) -> String {
    let project = TestProject::new(INFRA_CONFIG);
    let (bin, calls) = fake_docker(&project);

    let mut child = project
        .command("start")
        .args(flags)
        .env("PATH", path_with(&bin))
        .spawn()
        .expect("failed to start stackrig");
    assert!(wait_for_record(&project, "core", Duration::from_secs(10))
        .await
        .is_some());
    interrupt(&child);
    let status = tokio::time::timeout(Duration::from_secs(20), child.wait())
        .await
        .expect("stackrig did not exit in time")
        .unwrap();
    assert!(status.success());
    std::fs::read_to_string(calls).unwrap_or_default()
}

#[tokio::test]
async fn infra_is_brought_down_on_shutdown() {
    let calls = run_with_infra(&[]).await;
    let lines: Vec<&str> = calls.lines().collect();
    assert_eq!(lines.len(), 2, "unexpected compose calls: {calls}");
    assert!(lines[0].contains("up -d"));
    assert!(lines[1].contains("down --remove-orphans"));
}

#[tokio::test]
async fn keep_infra_leaves_compose_running() {
    let calls = run_with_infra(&["--keep-infra"]).await;
    assert!(calls.contains("up -d"));
    assert!(!calls.contains("down"), "unexpected compose calls: {calls}");
}

#[tokio::test]
async fn port_sweep_kills_listener_outside_registry() {
    let port = free_port();
    let project = TestProject::new(&format!(
        r#"
[project]
name = "test-ports"

[shutdown]
ports = [{port}]
"#
    ));

    let mut squatter = tokio::process::Command::new("python3")
        .args(["-m", "http.server", &port.to_string()])
        .current_dir(project.dir.path())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("failed to start listener");
    assert!(wait_for_port(port, Duration::from_secs(10)).await);

    let status = tokio::time::timeout(Duration::from_secs(30), project.command("stop").status())
        .await
        .expect("stop did not finish in time")
        .unwrap();
    assert!(status.success());

    let squatter_status = tokio::time::timeout(Duration::from_secs(5), squatter.wait())
        .await
        .expect("listener survived the port sweep")
        .unwrap();
    assert_eq!(squatter_status.signal(), Some(9));
    assert!(wait_for_port_release(port, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn stop_recovers_after_orchestrator_died() {
    let project = TestProject::new(
        r#"
[project]
name = "test-dead-owner"

[[services]]
name = "core"
command = "sleep 300"

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

    // No chance to clean up: the registry file is all that is left
    child.start_kill().unwrap();
    child.wait().await.unwrap();
    assert!(pid_alive(group), "service should outlive its orchestrator");
    assert!(project.registry_path().exists());

    let status = tokio::time::timeout(Duration::from_secs(30), project.command("stop").status())
        .await
        .expect("stop did not finish in time")
        .unwrap();
    assert!(status.success());
    assert!(wait_for_pid_exit(group, Duration::from_secs(5)).await);
    assert!(!project.registry_path().exists());
}
