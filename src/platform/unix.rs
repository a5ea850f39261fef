use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, warn};

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

use super::{ProcessInfo, SignalTarget, StopSignal};

/// Service commands are POSIX shell whatever the user's `$SHELL` is.
const POSIX_SHELL: &str = "sh";

/// Human-readable description of the shell for log messages.
pub fn shell_name() -> String {
    format!("{} -c", POSIX_SHELL)
}

pub fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new(POSIX_SHELL);
    cmd.arg("-c").arg(command);
    cmd
}

pub fn configure_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

fn to_signal(signal: StopSignal) -> Signal {
    match signal {
        StopSignal::Graceful => Signal::SIGTERM,
        StopSignal::Force => Signal::SIGKILL,
    }
}

pub fn signal_target(target: SignalTarget, signal: StopSignal) -> std::io::Result<bool> {
    let sig = to_signal(signal);
    let pid = Pid::from_raw(target.pid);
    let result = if target.group {
        killpg(pid, sig)
    } else {
        kill(pid, sig)
    };
    match result {
        Ok(()) => {
            debug!(
                pid = target.pid,
                group = target.group,
                signal = sig.as_str(),
                "signal delivered"
            );
            Ok(true)
        }
        // Target (group) already gone.
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => {
            warn!(pid = target.pid, group = target.group, error = %e, "signal failed");
            Err(std::io::Error::from(e))
        }
    }
}

pub fn is_target_alive(target: SignalTarget) -> bool {
    let pid = Pid::from_raw(target.pid);
    let status = if target.group {
        killpg(pid, None)
    } else {
        kill(pid, None)
    };
    // EPERM means something exists that we may not signal.
    matches!(status, Ok(()) | Err(Errno::EPERM))
}

pub fn is_process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

pub fn which(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = Path::new(program);
        return is_executable(path).then(|| path.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(target_os = "linux")]
pub fn list_processes() -> Vec<ProcessInfo> {
    let Ok(proc_dir) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    let mut processes = Vec::new();
    for entry in proc_dir.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let Ok(raw) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        // Kernel threads have an empty cmdline.
        if raw.is_empty() {
            continue;
        }
        let cmdline = String::from_utf8_lossy(&raw)
            .replace('\0', " ")
            .trim()
            .to_string();
        processes.push(ProcessInfo { pid, cmdline });
    }
    processes
}

#[cfg(not(target_os = "linux"))]
pub fn list_processes() -> Vec<ProcessInfo> {
    Vec::new()
}

/// Socket inodes in LISTEN state bound to `port`, from one `/proc/net/tcp*` table.
#[cfg(target_os = "linux")]
fn listening_inodes(table: &str, port: u16) -> Vec<String> {
    const TCP_LISTEN: &str = "0A";
    let port_hex = format!("{:04X}", port);

    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != TCP_LISTEN {
                return None;
            }
            let local_port = fields[1].rsplit(':').next()?;
            (local_port == port_hex && fields[9] != "0").then(|| fields[9].to_string())
        })
        .collect()
}

#[cfg(target_os = "linux")]
pub fn listening_pids(port: u16) -> Vec<u32> {
    let mut inodes = Vec::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        if let Ok(content) = std::fs::read_to_string(table) {
            inodes.extend(listening_inodes(&content, port));
        }
    }
    if inodes.is_empty() {
        return Vec::new();
    }
    let needles: Vec<String> = inodes.iter().map(|i| format!("socket:[{}]", i)).collect();

    let Ok(proc_dir) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    let mut pids = Vec::new();
    for entry in proc_dir.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        let holds_socket = fds.flatten().any(|fd| {
            std::fs::read_link(fd.path())
                .map(|link| needles.iter().any(|n| link.to_string_lossy() == n.as_str()))
                .unwrap_or(false)
        });
        if holds_socket {
            pids.push(pid);
        }
    }
    pids
}

#[cfg(not(target_os = "linux"))]
pub fn listening_pids(_port: u16) -> Vec<u32> {
    Vec::new()
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    const TCP_TABLE: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:1F40 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 424242 1 0000000000000000 100 0 0 10 0
   1: 0100007F:1F40 0100007F:C350 01 00000000:00000000 00:00000000 00000000  1000        0 515151 1 0000000000000000 20 4 30 10 -1
   2: 00000000:18EB 00000000:0000 0A 00000000:00000000 00:00000000 00000000   999        0 777 1 0000000000000000 100 0 0 10 0
";

    #[test]
    fn listening_inodes_only_matches_listen_state() {
        // 0x1F40 == 8000; the established row for the same port is ignored.
        assert_eq!(listening_inodes(TCP_TABLE, 8000), vec!["424242".to_string()]);
        assert_eq!(listening_inodes(TCP_TABLE, 6379), vec!["777".to_string()]);
        assert!(listening_inodes(TCP_TABLE, 4222).is_empty());
    }

    #[test]
    fn listening_pids_finds_own_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let pids = listening_pids(port);
        assert!(
            pids.contains(&std::process::id()),
            "expected own pid in {:?}",
            pids
        );
    }

    #[test]
    fn list_processes_includes_self() {
        let me = std::process::id();
        assert!(list_processes().iter().any(|p| p.pid == me));
    }

    #[test]
    fn commands_run_under_posix_sh() {
        let cmd = shell_command("echo hi");
        assert_eq!(cmd.as_std().get_program(), "sh");
        let args: Vec<_> = cmd.as_std().get_args().collect();
        assert_eq!(args, vec!["-c", "echo hi"]);
        assert_eq!(shell_name(), "sh -c");
    }

    #[test]
    fn which_finds_sh() {
        assert!(which("sh").is_some());
        assert!(which("definitely-not-a-real-binary-xyz").is_none());
    }

    #[test]
    fn absent_target_is_not_an_error() {
        // Reap a short-lived child so its pid is known dead.
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        child.wait().unwrap();
        let target = SignalTarget { pid, group: false };
        assert!(!is_target_alive(target));
        assert!(!signal_target(target, StopSignal::Graceful).unwrap());
    }
}
