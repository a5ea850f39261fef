use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct StackConfig {
    pub project: ProjectConfig,
    /// Binaries that must be on `PATH` before anything starts.
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub infra: Option<InfraConfig>,
    #[serde(default)]
    pub setup: Vec<SetupStep>,
    /// Application services, launched in the order they are declared.
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub env_file: Option<String>,
}

fn default_logs_dir() -> String {
    "logs".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_logs_dir")]
    pub dir: String,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dir: default_logs_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfraConfig {
    pub compose_file: String,
    /// Subset of compose services to bring up (all when empty).
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub env_file: Option<String>,
    #[serde(default)]
    pub health: BTreeMap<String, HealthCheck>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SetupKind {
    Deps,
    Migrations,
}

impl SetupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupKind::Deps => "deps",
            SetupKind::Migrations => "migrations",
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SetupStep {
    pub name: String,
    pub kind: SetupKind,
    pub command: String,
    #[serde(default)]
    pub path: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    pub command: String,
    /// Log file, relative to the run directory unless absolute.
    #[serde(default)]
    pub log: Option<String>,
    #[serde(default)]
    pub health: Option<HealthCheck>,
    #[serde(default)]
    pub restart: Option<RestartConfig>,
    #[serde(default = "default_true")]
    pub process_group: bool,
    /// Optional services may be disabled with `--no-<name>`.
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_delay_secs() -> u64 {
    3
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RestartConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_delay_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum HealthCheck {
    #[serde(rename = "http")]
    Http {
        url: String,
        #[serde(default)]
        timeout: Option<u64>,
        #[serde(default = "default_true")]
        required: bool,
    },
    #[serde(rename = "tcp")]
    Tcp {
        #[serde(default = "default_host")]
        host: String,
        port: u16,
        #[serde(default)]
        timeout: Option<u64>,
        #[serde(default = "default_true")]
        required: bool,
    },
}

impl HealthCheck {
    /// Get the configured timeout or the default of 60 seconds.
    pub fn timeout_secs(&self) -> u64 {
        let custom = match self {
            HealthCheck::Http { timeout, .. } => *timeout,
            HealthCheck::Tcp { timeout, .. } => *timeout,
        };
        custom.unwrap_or(60)
    }

    /// Whether a timeout fails the tier (true) or is only a warning.
    pub fn required(&self) -> bool {
        match self {
            HealthCheck::Http { required, .. } | HealthCheck::Tcp { required, .. } => *required,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            HealthCheck::Http { url, .. } => url.clone(),
            HealthCheck::Tcp { host, port, .. } => format!("tcp://{}:{}", host, port),
        }
    }
}

fn default_grace_secs() -> u64 {
    30
}

fn default_orphan_grace_secs() -> u64 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    #[serde(default = "default_orphan_grace_secs")]
    pub orphan_grace_secs: u64,
    /// Command-line substrings identifying stray service processes.
    #[serde(default)]
    pub orphan_patterns: Vec<String>,
    /// Ports whose listeners are force-killed as a last resort.
    #[serde(default)]
    pub ports: Vec<u16>,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
            orphan_grace_secs: default_orphan_grace_secs(),
            orphan_patterns: Vec::new(),
            ports: Vec::new(),
        }
    }
}
