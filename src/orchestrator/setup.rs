use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::error::{LaunchError, TierError};
use super::logs::LogSink;
use crate::config::model::{SetupKind, SetupStep};
use crate::config::resolve::StackPaths;
use crate::platform::{self, SignalTarget, StopSignal};

/// Shared inputs for one-shot setup commands.
pub struct SetupContext<'a> {
    pub paths: &'a StackPaths,
    pub env: &'a BTreeMap<String, String>,
    pub log_dir: PathBuf,
    pub shutdown: &'a CancellationToken,
}

/// Run every step of `kind`, in order, stopping at the first failure.
/// Returns the number of steps run.
pub async fn run_steps(
    steps: &[SetupStep],
    kind: SetupKind,
    ctx: &SetupContext<'_>,
) -> Result<usize, TierError> {
    let mut ran = 0;
    for step in steps.iter().filter(|s| s.kind == kind) {
        run_step(step, ctx).await?;
        ran += 1;
    }
    Ok(ran)
}

async fn run_step(step: &SetupStep, ctx: &SetupContext<'_>) -> Result<(), TierError> {
    let dir = ctx.paths.working_dir(step.path.as_deref());
    if !dir.is_dir() {
        return Err(LaunchError::MissingWorkingDir {
            label: step.name.clone(),
            dir,
        }
        .into());
    }

    let log_path = ctx
        .log_dir
        .join(format!("{}-{}.log", step.kind.as_str(), step.name));
    let log_error = |source| LaunchError::LogSink {
        label: step.name.clone(),
        path: log_path.clone(),
        source,
    };
    let stdout = LogSink::prepare(&log_path).map_err(log_error)?;
    let stderr = stdout.try_clone().map_err(log_error)?;

    let mut cmd = platform::shell_command(&step.command);
    cmd.current_dir(&dir)
        .envs(ctx.env)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true);
    platform::configure_process_group(&mut cmd);

    info!(step = %step.name, kind = step.kind.as_str(), "running: {}", step.command);
    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
        label: step.name.clone(),
        source,
    })?;

    let status = tokio::select! {
        status = child.wait() => status,
        _ = ctx.shutdown.cancelled() => {
            warn!(step = %step.name, "interrupted, killing setup step");
            if let Some(pid) = child.id() {
                let _ = platform::signal_target(
                    SignalTarget { pid: pid as i32, group: true },
                    StopSignal::Force,
                );
            }
            let _ = child.wait().await;
            return Err(TierError::Interrupted);
        }
    };

    let code = match status {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            error!(step = %step.name, error = %e, "wait() failed");
            -1
        }
    };

    if code != 0 {
        error!(
            step = %step.name,
            exit_code = code,
            log = %log_path.display(),
            "setup step failed"
        );
        return Err(TierError::Setup {
            step: step.name.clone(),
            code,
        });
    }

    info!(
        step = %step.name,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "setup step finished"
    );
    Ok(())
}
