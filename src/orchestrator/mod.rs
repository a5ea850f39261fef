pub mod error;
pub mod health;
pub mod logs;
pub mod ports;
pub mod process;
pub mod registry;
pub mod setup;
pub mod shutdown;
pub mod supervisor;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::compose::ComposeStack;
use crate::config;
use crate::config::model::{HealthCheck, ServiceConfig, SetupKind, StackConfig};
use crate::config::resolve::StackPaths;
use crate::config::validate::{check_disabled, validate};
use crate::identity::ProjectIdentity;
use crate::platform::{self, SignalTarget, StopSignal};
use crate::ui::summary::{print_startup_summary, RowStatus, SummaryRow};

use error::{HealthTimeoutError, LaunchError, TierError};
use health::{HealthGate, HealthOutcome};
use logs::RunLogs;
use ports::{check_service_ports, format_port_conflicts};
pub use process::ServiceSpec;
use registry::{Registry, RegistryFile};
use setup::SetupContext;
use shutdown::{ShutdownCoordinator, ShutdownSettings};
use supervisor::{RestartPolicy, ServicePhase, ServiceSupervisor, SupervisorOutcome};

type SupervisorResult = Result<SupervisorOutcome, LaunchError>;

/// Flags given to `stackrig start`.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub skip_deps: bool,
    pub skip_migrations: bool,
    pub keep_infra: bool,
    /// Optional services switched off with `--no-<name>`.
    pub disabled: Vec<String>,
    pub max_restarts: Option<u32>,
    pub restart_delay: Option<u64>,
    pub health_timeout: Option<u64>,
    pub env_file: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub registry_file: Option<PathBuf>,
}

/// Drives the startup tiers, then waits for a signal (or for every service to
/// finish) and hands over to the [`ShutdownCoordinator`].
///
/// Tier order:
///   1. prerequisite binaries
///   2. stale-run and port checks
///   3. infrastructure up + health gates
///   4. dependency install (`--skip-deps`)
///   5. migrations (`--skip-migrations`)
///   6. each enabled service, launched and gated in configured order
pub struct Orchestrator {
    config: StackConfig,
    identity: ProjectIdentity,
    paths: StackPaths,
    options: StartOptions,
    env: BTreeMap<String, String>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    health: HealthGate,
    degraded: Arc<Mutex<Vec<String>>>,
}

impl Orchestrator {
    /// Load, validate and resolve everything `start` needs. Nothing is
    /// launched yet.
    pub fn from_config(config_path: PathBuf, options: StartOptions) -> Result<Self> {
        let (config, source) = config::load_config(&config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?;

        let filename = config_path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| config::resolve::CONFIG_FILENAME.to_string());

        if let Err(errors) = validate(&config, &source, &filename) {
            let mut msg = String::from("Configuration errors:\n");
            for err in &errors {
                msg.push_str(&format!("  - {}\n", err));
            }
            bail!("{}", msg.trim_end());
        }
        check_disabled(&config, &options.disabled)?;

        let identity = ProjectIdentity::from_config(&config, &config_path)
            .context("computing project identity")?;
        let paths = StackPaths::resolve(
            &identity.config_path,
            &config,
            options.log_dir.as_deref(),
            options.registry_file.as_deref(),
        );
        let env = config::env::build_stack_env(
            &config,
            &paths.project_dir,
            options.env_file.as_deref(),
        )?;

        Ok(Self {
            config,
            identity,
            paths,
            options,
            env,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            health: HealthGate::new()?,
            degraded: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Shorten the health poll interval (tests).
    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health = self.health.with_interval(interval);
        self
    }

    fn is_enabled(&self, name: &str) -> bool {
        !self.options.disabled.iter().any(|d| d == name)
    }

    fn health_timeout(&self, check: &HealthCheck) -> Duration {
        Duration::from_secs(
            self.options
                .health_timeout
                .unwrap_or_else(|| check.timeout_secs()),
        )
    }

    /// Resolve one configured service against CLI overrides and the run's
    /// log directory.
    pub fn spec_for(&self, svc: &ServiceConfig, run: &RunLogs) -> ServiceSpec {
        let mut restart = svc.restart.clone().unwrap_or_default();
        if let Some(max) = self.options.max_restarts {
            restart.max_attempts = max;
        }
        if let Some(delay) = self.options.restart_delay {
            restart.delay_secs = delay;
        }

        let mut env = self.env.clone();
        env.extend(svc.env.clone());

        ServiceSpec {
            label: svc.name.clone(),
            working_dir: self.paths.working_dir(svc.path.as_deref()),
            command: svc.command.clone(),
            log_path: run.path_for(&svc.name, svc.log.as_deref()),
            health: svc.health.clone(),
            policy: RestartPolicy::from_config(&restart),
            process_group: svc.process_group,
            env,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut required = self.config.prerequisites.clone();
        if self.config.infra.is_some() && !required.iter().any(|p| p == "docker") {
            required.push("docker".to_string());
        }
        let missing = crate::commands::doctor::missing_binaries(&required);
        if !missing.is_empty() {
            return Err(TierError::MissingPrerequisites(missing).into());
        }

        if let Some(previous) = RegistryFile::load(&self.paths.registry_file) {
            let live = previous.live_records();
            if !live.is_empty() {
                let labels: Vec<&str> = live.iter().map(|r| r.label.as_str()).collect();
                bail!(
                    "a previous run (pid {}) still has live services: {}\nRun `stackrig stop` first.",
                    previous.owner_pid,
                    labels.join(", ")
                );
            }
        }

        let conflicts = check_service_ports(
            self.config
                .services
                .iter()
                .filter(|s| self.is_enabled(&s.name)),
        );
        if !conflicts.is_empty() {
            return Err(TierError::PortsInUse(format_port_conflicts(&conflicts)).into());
        }

        let run = RunLogs::create(&self.paths.log_root).with_context(|| {
            format!("creating log directory under {}", self.paths.log_root.display())
        })?;
        let registry = Arc::new(Registry::with_mirror(&self.paths.registry_file));
        let infra = self.config.infra.as_ref().map(|infra| {
            ComposeStack::new(infra, &self.paths.project_dir, &self.identity.compose_project())
                .with_log_file(run.dir().join("infra.log"))
        });
        let coordinator = ShutdownCoordinator::new(
            Arc::clone(&registry),
            self.shutdown.clone(),
            ShutdownSettings::from_config(&self.config.shutdown, self.options.keep_infra),
            infra.clone(),
        );

        spawn_signal_listener(self.shutdown.clone())?;

        let mut rows = Vec::new();
        match self
            .run_tiers(&registry, &run, infra.as_ref(), &mut rows)
            .await
        {
            Ok(()) => {}
            Err(TierError::Interrupted) => {
                warn!("startup interrupted");
                coordinator.shutdown().await;
                self.drain().await;
                return Ok(());
            }
            Err(e) => {
                error!("{}", e);
                coordinator.shutdown().await;
                self.drain().await;
                return Err(e.into());
            }
        }

        print_startup_summary(&self.identity, &rows, run.dir());

        if self.tracker.is_empty() {
            self.shutdown.cancelled().await;
        } else {
            tokio::select! {
                _ = self.shutdown.cancelled() => {}
                _ = async {
                    self.tracker.close();
                    self.tracker.wait().await;
                } => {
                    info!("all services exited");
                }
            }
        }

        eprintln!("\nShutting down...");
        coordinator.shutdown().await;
        self.drain().await;

        let degraded = self
            .degraded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if !degraded.is_empty() {
            warn!(services = %degraded.join(", "), "run ended degraded");
        }
        Ok(())
    }

    /// Let supervisor tasks observe the end of their children.
    async fn drain(&self) {
        self.tracker.close();
        match tokio::time::timeout(Duration::from_secs(10), self.tracker.wait()).await {
            Ok(()) => info!("all supervisors stopped"),
            Err(_) => warn!("supervisors still running after shutdown"),
        }
    }

    async fn run_tiers(
        &self,
        registry: &Arc<Registry>,
        run: &RunLogs,
        infra: Option<&ComposeStack>,
        rows: &mut Vec<SummaryRow>,
    ) -> Result<(), TierError> {
        if let (Some(stack), Some(infra_cfg)) = (infra, &self.config.infra) {
            tokio::select! {
                result = stack.up() => result.map_err(TierError::Infra)?,
                _ = self.shutdown.cancelled() => return Err(TierError::Interrupted),
            }
            for (name, check) in &infra_cfg.health {
                let status = self.gate(name, check).await?;
                rows.push(SummaryRow {
                    name: name.clone(),
                    tier: "infra",
                    health: Some(check.describe()),
                    group: None,
                    status,
                });
            }
        }

        let ctx = SetupContext {
            paths: &self.paths,
            env: &self.env,
            log_dir: run.dir().to_path_buf(),
            shutdown: &self.shutdown,
        };
        if self.options.skip_deps {
            info!("skipping dependency install (--skip-deps)");
        } else {
            setup::run_steps(&self.config.setup, SetupKind::Deps, &ctx).await?;
        }
        if self.options.skip_migrations {
            info!("skipping migrations (--skip-migrations)");
        } else {
            setup::run_steps(&self.config.setup, SetupKind::Migrations, &ctx).await?;
        }

        for svc in &self.config.services {
            if !self.is_enabled(&svc.name) {
                info!(service = %svc.name, "disabled (--no-{})", svc.name);
                rows.push(SummaryRow {
                    name: svc.name.clone(),
                    tier: "service",
                    health: None,
                    group: None,
                    status: RowStatus::Disabled,
                });
                continue;
            }
            if self.shutdown.is_cancelled() {
                return Err(TierError::Interrupted);
            }

            let spec = self.spec_for(svc, run);
            let (mut handle, mut phase) = self.spawn_supervisor(spec.clone(), registry);

            let status = tokio::select! {
                joined = &mut handle => startup_exit(&spec.label, joined)?,
                status = self.gate_service(&spec, &mut phase) => status?,
            };

            let group = registry
                .snapshot()
                .into_iter()
                .find(|r| r.label == spec.label)
                .map(|r| r.group_id);
            rows.push(SummaryRow {
                name: spec.label.clone(),
                tier: "service",
                health: spec.health.as_ref().map(HealthCheck::describe),
                group,
                status,
            });
        }

        Ok(())
    }

    fn spawn_supervisor(
        &self,
        spec: ServiceSpec,
        registry: &Arc<Registry>,
    ) -> (JoinHandle<SupervisorResult>, watch::Receiver<ServicePhase>) {
        let label = spec.label.clone();
        let (supervisor, phase) =
            ServiceSupervisor::new(spec, Arc::clone(registry), self.shutdown.clone());
        let degraded = Arc::clone(&self.degraded);

        let handle = self.tracker.spawn(async move {
            let outcome = supervisor.run().await;
            let failure = match &outcome {
                Ok(SupervisorOutcome::GivenUp(e)) => Some(e.to_string()),
                Err(e) => Some(e.to_string()),
                Ok(_) => None,
            };
            if let Some(reason) = failure {
                error!(service = %label, "{}; other services keep running", reason);
                degraded
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(label);
            }
            outcome
        });
        (handle, phase)
    }

    /// Resolves once the service passes its gate. Without a health check the
    /// gate is the first successful launch.
    async fn gate_service(
        &self,
        spec: &ServiceSpec,
        phase: &mut watch::Receiver<ServicePhase>,
    ) -> Result<RowStatus, TierError> {
        match &spec.health {
            Some(check) => self.gate(&spec.label, check).await,
            None => {
                let running = phase
                    .wait_for(|p| matches!(p, ServicePhase::Running { .. }))
                    .await
                    .is_ok();
                if running {
                    Ok(RowStatus::Running)
                } else {
                    // Supervisor ended; the join branch reports why.
                    std::future::pending().await
                }
            }
        }
    }

    async fn gate(&self, label: &str, check: &HealthCheck) -> Result<RowStatus, TierError> {
        let timeout = self.health_timeout(check);
        info!(
            service = %label,
            target = %check.describe(),
            timeout_secs = timeout.as_secs(),
            "waiting for health check"
        );

        match self.health.wait(label, check, timeout, &self.shutdown).await {
            HealthOutcome::Healthy { elapsed } => {
                info!(service = %label, elapsed_ms = elapsed.as_millis() as u64, "healthy");
                Ok(RowStatus::Healthy)
            }
            HealthOutcome::TimedOut { .. } if check.required() => Err(HealthTimeoutError {
                label: label.to_string(),
                timeout_secs: timeout.as_secs(),
            }
            .into()),
            HealthOutcome::TimedOut { .. } => {
                warn!(
                    service = %label,
                    timeout_secs = timeout.as_secs(),
                    "health check timed out, continuing (not required)"
                );
                Ok(RowStatus::Unhealthy)
            }
            HealthOutcome::Cancelled => Err(TierError::Interrupted),
        }
    }

    /// `stackrig stop`: ask the owning orchestrator to exit, then run the full
    /// shutdown sequence from the registry file.
    pub async fn stop(
        config_path: PathBuf,
        keep_infra: bool,
        registry_override: Option<PathBuf>,
    ) -> Result<()> {
        let (config, _) = config::load_config(&config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?;
        let identity = ProjectIdentity::from_config(&config, &config_path)
            .context("computing project identity")?;
        let paths = StackPaths::resolve(
            &identity.config_path,
            &config,
            None,
            registry_override.as_deref(),
        );

        if let Some(file) = RegistryFile::load(&paths.registry_file) {
            let owner = file.owner_pid;
            if owner != 0 && owner != std::process::id() && platform::is_process_alive(owner) {
                info!(pid = owner, "asking running orchestrator to shut down");
                platform::signal_target(
                    SignalTarget {
                        pid: owner as i32,
                        group: false,
                    },
                    StopSignal::Graceful,
                )
                .context("signalling orchestrator")?;

                let wait = Duration::from_secs(config.shutdown.grace_secs + 10);
                let deadline = tokio::time::Instant::now() + wait;
                while platform::is_process_alive(owner) && tokio::time::Instant::now() < deadline {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                if platform::is_process_alive(owner) {
                    warn!(pid = owner, "orchestrator still running, continuing from registry file");
                }
            }
        }

        // Re-read: the owner may have cleaned up already.
        let registry = Arc::new(Registry::from_file(&paths.registry_file));
        let infra = config.infra.as_ref().map(|infra| {
            ComposeStack::new(infra, &paths.project_dir, &identity.compose_project())
        });
        let coordinator = ShutdownCoordinator::new(
            registry,
            CancellationToken::new(),
            ShutdownSettings::from_config(&config.shutdown, keep_infra),
            infra,
        );
        if let Some(report) = coordinator.shutdown().await {
            println!(
                "Stopped {} service(s), force-killed {}, swept {} orphan(s).",
                report.signalled.len(),
                report.force_killed.len(),
                report.orphans.len()
            );
        }
        Ok(())
    }
}

/// Map a supervisor that ended while its service was still being gated.
fn startup_exit(
    label: &str,
    joined: std::result::Result<SupervisorResult, JoinError>,
) -> Result<RowStatus, TierError> {
    match joined {
        Ok(Ok(SupervisorOutcome::Completed { .. })) => Ok(RowStatus::Completed),
        Ok(Ok(SupervisorOutcome::GivenUp(e))) => Err(e.into()),
        Ok(Ok(SupervisorOutcome::StoppedByShutdown)) => Err(TierError::Interrupted),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(TierError::SupervisorPanicked(label.to_string())),
    }
}

/// SIGINT/SIGTERM cancel the shutdown flag; repeats are logged and ignored.
fn spawn_signal_listener(flag: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            };
            if flag.is_cancelled() {
                warn!(signal = name, "shutdown already in progress");
            } else {
                info!(signal = name, "received signal, shutting down");
                flag.cancel();
            }
        }
    });
    Ok(())
}
