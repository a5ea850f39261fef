use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use chrono::Utc;
use tokio::process::Child;
use tracing::{debug, info};

use super::error::LaunchError;
use super::logs::LogSink;
use super::registry::ProcessRecord;
use super::supervisor::RestartPolicy;
use crate::config::model::HealthCheck;
use crate::platform::{self, SignalTarget, StopSignal};

/// Everything needed to (re)launch one service, resolved from config and CLI
/// flags before the first launch and never changed afterwards.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub label: String,
    pub working_dir: PathBuf,
    pub command: String,
    pub log_path: PathBuf,
    pub health: Option<HealthCheck>,
    pub policy: RestartPolicy,
    pub process_group: bool,
    pub env: BTreeMap<String, String>,
}

/// Words the shell handles itself; they never need to be on `PATH`.
const SHELL_BUILTINS: &[&str] = &[
    "cd", "exec", "source", ".", "export", "set", "ulimit", "umask", "trap", "eval", "echo",
    "exit", "true", "false", "test", "[", ":", "if", "for", "while", "case", "{", "(",
];

/// Characters that make a word something the shell expands or groups.
const SHELL_SYNTAX: &[char] = &[
    '$', '(', ')', '"', '\'', '\\', '`', '{', '}', ';', '&', '|', '<', '>', '*', '?', '[',
];

/// First word of a shell command that must resolve to an executable, if any.
///
/// Only plain words are checked. Anything the shell would expand (variables,
/// quotes, subshells, globs) is left for the shell to resolve at launch.
fn leading_program(command: &str) -> Option<String> {
    let word = command.split_whitespace().find(|word| !word.contains('='))?;
    if SHELL_BUILTINS.contains(&word) {
        return None;
    }
    let word = if word.starts_with('~') {
        platform::expand_home(word)
    } else {
        word.to_string()
    };
    if word.starts_with('~') || word.contains(SHELL_SYNTAX) {
        return None;
    }
    Some(word)
}

/// A running child process (and, when grouped, its whole process group).
#[derive(Debug)]
pub struct ProcessHandle {
    label: String,
    child: Child,
    target: SignalTarget,
}

impl ProcessHandle {
    /// Spawn `spec.command` under `sh -c` with output appended to
    /// `spec.log_path` (rotated first).
    pub fn launch(
        spec: &ServiceSpec,
        attempt: u32,
        last_exit_code: Option<i32>,
    ) -> Result<(Self, ProcessRecord), LaunchError> {
        if !spec.working_dir.is_dir() {
            return Err(LaunchError::MissingWorkingDir {
                label: spec.label.clone(),
                dir: spec.working_dir.clone(),
            });
        }

        if let Some(program) = leading_program(&spec.command) {
            let found = if program.contains('/') {
                platform::which(&spec.working_dir.join(&program).to_string_lossy())
            } else {
                platform::which(&program)
            };
            if found.is_none() {
                return Err(LaunchError::ExecutableNotFound {
                    label: spec.label.clone(),
                    program,
                });
            }
        }

        let log_error = |source| LaunchError::LogSink {
            label: spec.label.clone(),
            path: spec.log_path.clone(),
            source,
        };
        let stdout = LogSink::prepare(&spec.log_path).map_err(log_error)?;
        let stderr = stdout.try_clone().map_err(log_error)?;

        let mut cmd = platform::shell_command(&spec.command);
        cmd.current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        if spec.process_group {
            platform::configure_process_group(&mut cmd);
        }

        let spawn_error = |source| LaunchError::Spawn {
            label: spec.label.clone(),
            source,
        };
        let child = cmd.spawn().map_err(spawn_error)?;
        let pid = child.id().ok_or_else(|| {
            spawn_error(std::io::Error::other("child exited before its pid was read"))
        })?;

        let target = SignalTarget {
            pid: pid as i32,
            group: spec.process_group,
        };
        info!(
            service = %spec.label,
            attempt,
            group = target.pid,
            "launched: {} {:?}",
            platform::shell_name(),
            spec.command,
        );

        let record = ProcessRecord {
            label: spec.label.clone(),
            group_id: target.pid,
            grouped: target.group,
            started_at: Utc::now(),
            attempt,
            last_exit_code,
        };

        Ok((
            Self {
                label: spec.label.clone(),
                child,
                target,
            },
            record,
        ))
    }

    pub fn target(&self) -> SignalTarget {
        self.target
    }

    /// Wait for the child to exit and return its exit code, or `128 + signal`
    /// when it was killed by a signal.
    pub async fn wait(&mut self) -> std::io::Result<i32> {
        let status = self.child.wait().await?;
        let code = exit_code(status);
        debug!(service = %self.label, exit_code = code, "child reaped");
        Ok(code)
    }

    pub fn signal(&self, signal: StopSignal) -> std::io::Result<bool> {
        platform::signal_target(self.target, signal)
    }

    pub fn force_kill(&self) -> std::io::Result<bool> {
        self.signal(StopSignal::Force)
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
