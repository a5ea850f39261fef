use std::path::PathBuf;

use thiserror::Error;

/// A service process could not be started. Fatal to the tier.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("service `{label}`: working directory {} does not exist", dir.display())]
    MissingWorkingDir { label: String, dir: PathBuf },

    #[error("service `{label}`: `{program}` not found on PATH")]
    ExecutableNotFound { label: String, program: String },

    #[error("service `{label}`: cannot open log file {}", path.display())]
    LogSink {
        label: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("service `{label}`: spawn failed")]
    Spawn {
        label: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
#[error("`{label}` did not become healthy within {timeout_secs}s")]
pub struct HealthTimeoutError {
    pub label: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Error)]
#[error("`{label}` gave up after {attempts} launches (last exit code {last_exit_code})")]
pub struct CrashLoopError {
    pub label: String,
    pub attempts: u32,
    pub last_exit_code: i32,
}

/// A group outlived the grace window and was force-killed. Only ever logged.
#[derive(Debug, Error)]
#[error("`{label}` (group {group_id}) survived the grace window, sending SIGKILL")]
pub struct ShutdownTimeoutError {
    pub label: String,
    pub group_id: i32,
}

/// Why a startup tier failed.
#[derive(Debug, Error)]
pub enum TierError {
    #[error("missing prerequisites: {}", .0.join(", "))]
    MissingPrerequisites(Vec<String>),

    #[error("infrastructure failed to start")]
    Infra(#[source] anyhow::Error),

    #[error("{0}")]
    PortsInUse(String),

    #[error("setup step `{step}` failed with exit code {code}")]
    Setup { step: String, code: i32 },

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    HealthTimeout(#[from] HealthTimeoutError),

    #[error(transparent)]
    CrashLoop(#[from] CrashLoopError),

    #[error("supervisor for `{0}` panicked")]
    SupervisorPanicked(String),

    #[error("interrupted during startup")]
    Interrupted,
}
