use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{CrashLoopError, LaunchError};
use super::process::{ProcessHandle, ServiceSpec};
use super::registry::Registry;
use crate::config::model::RestartConfig;
use crate::platform;

// ---------------------------------------------------------------------------
// RestartPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart(Duration),
    GiveUp,
    Stop,
}

/// Bounded, fixed-delay restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&RestartConfig::default())
    }
}

impl RestartPolicy {
    pub fn from_config(cfg: &RestartConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            delay: Duration::from_secs(cfg.delay_secs),
        }
    }

    /// `attempt` is the 1-based number of the launch that just exited.
    pub fn decide(&self, exit_code: i32, attempt: u32, shutting_down: bool) -> RestartDecision {
        if shutting_down || exit_code == 0 {
            RestartDecision::Stop
        } else if attempt <= self.max_attempts {
            RestartDecision::Restart(self.delay)
        } else {
            RestartDecision::GiveUp
        }
    }
}

// ---------------------------------------------------------------------------
// ServicePhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServicePhase {
    Starting { attempt: u32 },
    Running { attempt: u32, group_id: i32 },
    Exited { attempt: u32, exit_code: i32 },
    Restarting { next_attempt: u32, delay: Duration },
    GivenUp { attempts: u32, last_exit_code: i32 },
    StoppedByShutdown,
    Completed { exit_code: i32 },
}

impl ServicePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServicePhase::Starting { .. } => "starting",
            ServicePhase::Running { .. } => "running",
            ServicePhase::Exited { .. } => "exited",
            ServicePhase::Restarting { .. } => "restarting",
            ServicePhase::GivenUp { .. } => "given up",
            ServicePhase::StoppedByShutdown => "stopped",
            ServicePhase::Completed { .. } => "completed",
        }
    }
}

#[derive(Debug)]
pub enum SupervisorOutcome {
    /// The service exited 0 and was not restarted.
    Completed { exit_code: i32 },
    GivenUp(CrashLoopError),
    StoppedByShutdown,
}

// ---------------------------------------------------------------------------
// ServiceSupervisor
// ---------------------------------------------------------------------------

pub struct ServiceSupervisor {
    spec: ServiceSpec,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
    phase: watch::Sender<ServicePhase>,
}

impl ServiceSupervisor {
    pub fn new(
        spec: ServiceSpec,
        registry: Arc<Registry>,
        shutdown: CancellationToken,
    ) -> (Self, watch::Receiver<ServicePhase>) {
        let (phase, rx) = watch::channel(ServicePhase::Starting { attempt: 1 });
        (
            Self {
                spec,
                registry,
                shutdown,
                phase,
            },
            rx,
        )
    }

    fn set_phase(&self, phase: ServicePhase) {
        debug!(service = %self.spec.label, phase = phase.as_str(), "phase change");
        self.phase.send_replace(phase);
    }

    fn stopped(&self) -> Result<SupervisorOutcome, LaunchError> {
        self.set_phase(ServicePhase::StoppedByShutdown);
        Ok(SupervisorOutcome::StoppedByShutdown)
    }

    /// Drop the registry entry once nothing of the group is left. Leftover
    /// grandchildren keep the entry so shutdown still signals them.
    fn release(&self, group_id: i32, grouped: bool) {
        let target = platform::SignalTarget {
            pid: group_id,
            group: grouped,
        };
        if !platform::is_target_alive(target) {
            self.registry.remove(&self.spec.label, group_id);
        }
    }

    /// Launch, wait, and relaunch according to the policy until the service
    /// completes, gives up, or shutdown begins. Launch failures are returned
    /// as errors; everything else is an outcome.
    pub async fn run(self) -> Result<SupervisorOutcome, LaunchError> {
        let label = self.spec.label.clone();
        let mut attempt: u32 = 1;
        let mut last_exit_code: Option<i32> = None;

        loop {
            if self.shutdown.is_cancelled() {
                info!(service = %label, "shutdown requested before launch");
                return self.stopped();
            }

            self.set_phase(ServicePhase::Starting { attempt });
            let (mut handle, record) =
                match ProcessHandle::launch(&self.spec, attempt, last_exit_code) {
                    Ok(launched) => launched,
                    Err(e) => {
                        error!(service = %label, attempt, error = %e, "launch failed");
                        return Err(e);
                    }
                };
            let group_id = record.group_id;
            let grouped = record.grouped;

            if self.registry.record(record).is_err() {
                warn!(
                    service = %label,
                    group = group_id,
                    "shutdown began during launch, killing new process"
                );
                let _ = handle.force_kill();
                let _ = handle.wait().await;
                return self.stopped();
            }
            self.set_phase(ServicePhase::Running { attempt, group_id });

            // No select on shutdown here: the coordinator signals the group
            // and this task keeps reaping the child.
            let exit_code = match handle.wait().await {
                Ok(code) => code,
                Err(e) => {
                    error!(service = %label, error = %e, "wait() failed");
                    let _ = handle.force_kill();
                    -1
                }
            };

            info!(service = %label, exit_code, attempt, "process exited");
            self.set_phase(ServicePhase::Exited { attempt, exit_code });
            last_exit_code = Some(exit_code);

            let shutting_down = self.shutdown.is_cancelled();
            match self.spec.policy.decide(exit_code, attempt, shutting_down) {
                RestartDecision::Stop if shutting_down => {
                    info!(service = %label, "not restarting: shutdown in progress");
                    return self.stopped();
                }
                RestartDecision::Stop => {
                    info!(service = %label, "clean exit, not restarting");
                    self.release(group_id, grouped);
                    self.set_phase(ServicePhase::Completed { exit_code });
                    return Ok(SupervisorOutcome::Completed { exit_code });
                }
                RestartDecision::GiveUp => {
                    error!(
                        service = %label,
                        attempts = attempt,
                        exit_code,
                        "giving up: max restarts ({}) exceeded",
                        self.spec.policy.max_attempts,
                    );
                    self.release(group_id, grouped);
                    self.set_phase(ServicePhase::GivenUp {
                        attempts: attempt,
                        last_exit_code: exit_code,
                    });
                    return Ok(SupervisorOutcome::GivenUp(CrashLoopError {
                        label,
                        attempts: attempt,
                        last_exit_code: exit_code,
                    }));
                }
                RestartDecision::Restart(delay) => {
                    warn!(
                        service = %label,
                        exit_code,
                        attempt,
                        "restarting in {:?} (attempt {}/{})",
                        delay,
                        attempt + 1,
                        self.spec.policy.max_attempts + 1,
                    );
                    self.set_phase(ServicePhase::Restarting {
                        next_attempt: attempt + 1,
                        delay,
                    });
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => {
                            info!(service = %label, "restart abandoned: shutdown in progress");
                            return self.stopped();
                        }
                    }
                    attempt += 1;
                }
            }
        }
    }
}
