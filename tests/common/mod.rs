#![allow(dead_code)]
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

pub const BIN: &str = env!("CARGO_BIN_EXE_stackrig");

pub struct TestProject {
    pub dir: TempDir,
    pub config_path: PathBuf,
}

impl TestProject {
    pub fn new(config_toml: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("stackrig.toml");
        std::fs::write(&config_path, config_toml).unwrap();
        Self { dir, config_path }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.dir.path().join(".stackrig/registry.json")
    }

    pub fn log_root(&self) -> PathBuf {
        self.dir.path().join("logs")
    }

    /// Base command with the config and log root pinned to this project.
    pub fn command(&self, subcommand: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(BIN);
        cmd.arg("-f")
            .arg(&self.config_path)
            .arg(subcommand)
            .env("STACKRIG_LOG_DIR", self.log_root())
            .env_remove("STACKRIG_REGISTRY")
            .kill_on_drop(true);
        cmd
    }

    /// Contents of `<log root>/current/<file>`, empty if missing.
    pub fn read_log(&self, file: &str) -> String {
        std::fs::read_to_string(self.log_root().join("current").join(file)).unwrap_or_default()
    }
}

pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub async fn wait_for_port(port: u16, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

pub async fn wait_for_port_release(port: u16, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

pub async fn wait_for_file(path: &Path, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Wait until the registry file lists `label`, returning its group id.
pub async fn wait_for_record(project: &TestProject, label: &str, timeout: Duration) -> Option<i32> {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if let Ok(content) = std::fs::read_to_string(project.registry_path()) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&content) {
                if let Some(group) = value["records"][label]["group_id"].as_i64() {
                    return Some(group as i32);
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

/// Deliver SIGINT to a child, like Ctrl+C in a terminal.
pub fn interrupt(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGINT,
        )
        .ok();
    }
}

/// Zombies count as dead: they hold no resources and may never be reaped
/// inside a container without an init process.
pub fn pid_alive(pid: i32) -> bool {
    if nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_err() {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
            .unwrap_or(true),
        Err(_) => true,
    }
}

pub async fn wait_for_pid_exit(pid: i32, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if !pid_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
