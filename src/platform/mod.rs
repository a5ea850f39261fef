use std::path::PathBuf;
use tokio::process::Command;

mod unix;

use unix as imp;

/// How hard to ask a process (group) to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGTERM
    Graceful,
    /// SIGKILL
    Force,
}

/// What a signal is delivered to: a whole process group (led by `pid`) or a
/// single process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalTarget {
    pub pid: i32,
    pub group: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub cmdline: String,
}

/// Create a shell command: `sh -c <command>`.
pub fn shell_command(command: &str) -> Command {
    imp::shell_command(command)
}

/// Shell name for log messages.
pub fn shell_name() -> String {
    imp::shell_name()
}

/// Configure the command to run in a new process group (`process_group(0)`).
pub fn configure_process_group(cmd: &mut Command) {
    imp::configure_process_group(cmd)
}

/// Send `signal` to the target. Returns `Ok(false)` when the target no longer
/// exists.
pub fn signal_target(target: SignalTarget, signal: StopSignal) -> std::io::Result<bool> {
    imp::signal_target(target, signal)
}

/// Check whether any process of the target is still alive.
pub fn is_target_alive(target: SignalTarget) -> bool {
    imp::is_target_alive(target)
}

/// Check if a process with the given PID is still alive.
pub fn is_process_alive(pid: u32) -> bool {
    imp::is_process_alive(pid)
}

/// Locate an executable on `PATH` (or check a path containing `/`).
pub fn which(program: &str) -> Option<PathBuf> {
    imp::which(program)
}

/// Every user-space process with its NUL-joined command line.
pub fn list_processes() -> Vec<ProcessInfo> {
    imp::list_processes()
}

/// PIDs holding a listening TCP socket on `port`.
pub fn listening_pids(port: u16) -> Vec<u32> {
    imp::listening_pids(port)
}

/// Identify which process owns a given TCP port, for log messages.
pub fn identify_port_owner(port: u16) -> Option<String> {
    let pid = *listening_pids(port).first()?;
    let cmd = list_processes()
        .into_iter()
        .find(|p| p.pid == pid)
        .map(|p| p.cmdline)
        .unwrap_or_default();
    if cmd.is_empty() {
        return Some(format!("PID {}", pid));
    }
    if cmd.chars().count() > 60 {
        let short: String = cmd.chars().take(57).collect();
        return Some(format!("{}... (PID {})", short, pid));
    }
    Some(format!("{} (PID {})", cmd, pid))
}

/// Get the current user's home directory.
pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir()
}

/// Expand leading `~` or `$HOME` in a path string to the actual home directory.
///
/// Returns the original string unchanged when no home directory is available
/// or the string doesn't start with `~` or `$HOME`.
pub fn expand_home(path: &str) -> String {
    if let Some(home) = home_dir() {
        let home = home.to_string_lossy();
        if path == "~" || path == "$HOME" {
            return home.to_string();
        }
        if let Some(rest) = path.strip_prefix("~/") {
            return format!("{}/{}", home, rest);
        }
        if let Some(rest) = path.strip_prefix("$HOME/") {
            return format!("{}/{}", home, rest);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_home_tilde_slash() {
        let home = home_dir().unwrap();
        assert_eq!(
            expand_home("~/bin/cmd"),
            format!("{}/bin/cmd", home.display())
        );
    }

    #[test]
    fn expand_home_dollar_home() {
        let home = home_dir().unwrap();
        assert_eq!(expand_home("$HOME"), home.to_string_lossy());
        assert_eq!(
            expand_home("$HOME/projects"),
            format!("{}/projects", home.display())
        );
    }

    #[test]
    fn expand_home_no_expansion_needed() {
        assert_eq!(expand_home("/usr/bin/cmd"), "/usr/bin/cmd");
        assert_eq!(expand_home("relative/path"), "relative/path");
        assert_eq!(expand_home("/some/~path"), "/some/~path");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn identify_port_owner_reports_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let owner = identify_port_owner(port).expect("own listener should be found");
        assert!(owner.contains(&format!("PID {}", std::process::id())));
    }
}

#[cfg(test)]
pub mod test_commands {
    pub fn sleep_long() -> &'static str {
        "sleep 60"
    }

    pub fn exit_success() -> &'static str {
        "exit 0"
    }

    pub fn exit_failure() -> &'static str {
        "exit 3"
    }

    /// A command that spawns a grandchild and waits on it, so signalling only
    /// the direct child would leave the grandchild behind.
    pub fn with_grandchild() -> &'static str {
        "sleep 60 & wait"
    }
}
