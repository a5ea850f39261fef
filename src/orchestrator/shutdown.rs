use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::ShutdownTimeoutError;
use super::registry::{ProcessRecord, Registry};
use crate::compose::ComposeStack;
use crate::config::model::ShutdownConfig;
use crate::platform::{self, SignalTarget, StopSignal};

/// Liveness re-check interval inside the grace windows.
const POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ShutdownSettings {
    pub grace: Duration,
    pub orphan_grace: Duration,
    pub orphan_patterns: Vec<String>,
    pub ports: Vec<u16>,
    pub keep_infra: bool,
}

impl ShutdownSettings {
    pub fn from_config(cfg: &ShutdownConfig, keep_infra: bool) -> Self {
        Self {
            grace: Duration::from_secs(cfg.grace_secs),
            orphan_grace: Duration::from_secs(cfg.orphan_grace_secs),
            orphan_patterns: cfg.orphan_patterns.clone(),
            ports: cfg.ports.clone(),
            keep_infra,
        }
    }
}

/// What one shutdown sequence did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Labels that received SIGTERM.
    pub signalled: Vec<String>,
    /// Labels still alive after the grace window.
    pub force_killed: Vec<String>,
    pub orphans: Vec<u32>,
    /// `(port, pid)` pairs killed by the port sweep.
    pub port_holders: Vec<(u16, u32)>,
    pub infra_stopped: bool,
}

/// Runs the termination sequence exactly once, however many callers race to
/// trigger it.
pub struct ShutdownCoordinator {
    registry: Arc<Registry>,
    flag: CancellationToken,
    settings: ShutdownSettings,
    infra: Option<ComposeStack>,
    triggered: AtomicBool,
    finished: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(
        registry: Arc<Registry>,
        flag: CancellationToken,
        settings: ShutdownSettings,
        infra: Option<ComposeStack>,
    ) -> Self {
        Self {
            registry,
            flag,
            settings,
            infra,
            triggered: AtomicBool::new(false),
            finished: CancellationToken::new(),
        }
    }

    /// Run the sequence. The first caller gets the report; later callers
    /// wait until it has finished and get `None`.
    pub async fn shutdown(&self) -> Option<ShutdownReport> {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("shutdown already in progress, waiting for it to finish");
            self.finished.cancelled().await;
            return None;
        }

        let report = self.run_sequence().await;
        self.finished.cancel();
        Some(report)
    }

    async fn run_sequence(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        info!("shutting down");

        // Restart loops, health gates and delays all watch this flag.
        self.flag.cancel();
        let plan = self.registry.seal_and_snapshot();

        for record in &plan {
            match platform::signal_target(record.target(), StopSignal::Graceful) {
                Ok(true) => {
                    info!(service = %record.label, group = record.group_id, "sent SIGTERM");
                    report.signalled.push(record.label.clone());
                }
                Ok(false) => debug!(service = %record.label, "already gone"),
                Err(e) => warn!(service = %record.label, error = %e, "SIGTERM failed"),
            }
        }

        let survivors = wait_until_gone(&plan, self.settings.grace).await;
        for record in survivors {
            warn!(
                "{}",
                ShutdownTimeoutError {
                    label: record.label.clone(),
                    group_id: record.group_id,
                }
            );
            if let Err(e) = platform::signal_target(record.target(), StopSignal::Force) {
                warn!(service = %record.label, error = %e, "SIGKILL failed");
            }
            report.force_killed.push(record.label.clone());
        }

        report.orphans = self.sweep_orphans().await;
        report.port_holders = self.sweep_ports();

        if let Some(infra) = &self.infra {
            if self.settings.keep_infra {
                info!("leaving infrastructure running (--keep-infra)");
            } else {
                match infra.down().await {
                    Ok(()) => report.infra_stopped = true,
                    Err(e) => warn!(error = %e, "infrastructure teardown failed"),
                }
            }
        }

        self.registry.clear();
        info!(
            signalled = report.signalled.len(),
            force_killed = report.force_killed.len(),
            orphans = report.orphans.len(),
            "shutdown complete"
        );
        report
    }

    /// Terminate processes matching an orphan pattern that the registry did
    /// not know about, then SIGKILL whatever outlives the orphan grace.
    async fn sweep_orphans(&self) -> Vec<u32> {
        if self.settings.orphan_patterns.is_empty() {
            return Vec::new();
        }

        let own = std::process::id();
        #[cfg(unix)]
        let parent = std::os::unix::process::parent_id();
        #[cfg(not(unix))]
        let parent = own;

        let matches: Vec<u32> = platform::list_processes()
            .into_iter()
            .filter(|p| p.pid != own && p.pid != parent)
            .filter(|p| matches_orphan(&self.settings.orphan_patterns, &p.cmdline))
            .map(|p| {
                info!(pid = p.pid, cmdline = %p.cmdline, "terminating orphan");
                p.pid
            })
            .collect();

        let targets: Vec<SignalTarget> = matches
            .iter()
            .map(|&pid| SignalTarget {
                pid: pid as i32,
                group: false,
            })
            .collect();
        for target in &targets {
            let _ = platform::signal_target(*target, StopSignal::Graceful);
        }

        let deadline = Instant::now() + self.settings.orphan_grace;
        loop {
            let alive: Vec<&SignalTarget> = targets
                .iter()
                .filter(|t| platform::is_target_alive(**t))
                .collect();
            if alive.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                for target in alive {
                    warn!(pid = target.pid, "orphan survived SIGTERM, sending SIGKILL");
                    let _ = platform::signal_target(*target, StopSignal::Force);
                }
                break;
            }
            tokio::time::sleep(POLL).await;
        }

        matches
    }

    /// Last resort: SIGKILL anything still listening on a configured port.
    fn sweep_ports(&self) -> Vec<(u16, u32)> {
        let own = std::process::id();
        let mut killed = Vec::new();
        for &port in &self.settings.ports {
            for pid in platform::listening_pids(port) {
                if pid == own {
                    continue;
                }
                warn!(port, pid, "port still held, sending SIGKILL");
                let target = SignalTarget {
                    pid: pid as i32,
                    group: false,
                };
                if let Ok(true) = platform::signal_target(target, StopSignal::Force) {
                    killed.push((port, pid));
                }
            }
        }
        killed
    }
}

/// Poll until every target is gone or `grace` elapses; returns the survivors.
async fn wait_until_gone(plan: &[ProcessRecord], grace: Duration) -> Vec<&ProcessRecord> {
    let deadline = Instant::now() + grace;
    loop {
        let alive: Vec<&ProcessRecord> = plan
            .iter()
            .filter(|r| platform::is_target_alive(r.target()))
            .collect();
        if alive.is_empty() || Instant::now() >= deadline {
            return alive;
        }
        tokio::time::sleep(POLL).await;
    }
}

/// Substring match against a command line. Blank patterns never match.
fn matches_orphan(patterns: &[String], cmdline: &str) -> bool {
    patterns
        .iter()
        .filter(|pattern| !pattern.trim().is_empty())
        .any(|pattern| cmdline.contains(pattern.as_str()))
}
