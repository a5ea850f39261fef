use clap::{Args, Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "stackrig",
    version,
    about = "Bring up a multi-service development stack and tear it down cleanly"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Use a specific config file
    #[arg(short = 'f', long = "file", global = true)]
    pub config_file: Option<PathBuf>,

    /// Registry file tracking live process groups
    #[arg(long, env = "STACKRIG_REGISTRY", global = true, hide_env_values = true)]
    pub registry: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Skip dependency install steps
    #[arg(long)]
    pub skip_deps: bool,

    /// Skip migration steps
    #[arg(long)]
    pub skip_migrations: bool,

    /// Leave compose infrastructure running on shutdown
    #[arg(long)]
    pub keep_infra: bool,

    /// Disable an optional service (also accepted as `--no-<service>`)
    #[arg(long = "no", value_name = "SERVICE")]
    pub disabled: Vec<String>,

    /// Override max restart attempts for every service
    #[arg(long, value_name = "N")]
    pub max_restarts: Option<u32>,

    /// Override the restart delay (seconds) for every service
    #[arg(long, value_name = "SECS")]
    pub restart_delay: Option<u64>,

    /// Override every health check timeout (seconds)
    #[arg(long, value_name = "SECS")]
    pub health_timeout: Option<u64>,

    /// Extra KEY=VALUE file merged into every child environment
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Root directory for per-run log directories
    #[arg(long, env = "STACKRIG_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start infrastructure, run setup, and launch every service
    Start(StartArgs),
    /// Stop a running stack from another terminal
    Stop {
        /// Leave compose infrastructure running
        #[arg(long)]
        keep_infra: bool,
    },
    /// Show tracked process groups and infrastructure state
    Ps,
    /// Check that prerequisites are installed
    Doctor,
    /// Validate the configuration file
    Validate,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Long flags of `start` that begin with `--no`; everything else of that
/// shape is a `--no-<service>` switch.
const NO_PREFIXED_FLAGS: &[&str] = &["--no"];

/// Rewrite `--no-<service>` into `--no <service>` so clap can collect it.
/// Arguments after a bare `--` are left alone.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut out = Vec::new();
    let mut passthrough = false;
    for arg in args {
        let arg: OsString = arg.into();
        if passthrough {
            out.push(arg);
            continue;
        }
        match arg.to_str() {
            Some("--") => {
                passthrough = true;
                out.push(arg);
            }
            Some(s) if s.starts_with("--no-") && !NO_PREFIXED_FLAGS.contains(&s) => {
                let name = &s["--no-".len()..];
                if name.is_empty() || name.contains('=') {
                    out.push(arg);
                } else {
                    out.push(OsString::from("--no"));
                    out.push(OsString::from(name));
                }
            }
            _ => out.push(arg),
        }
    }
    out
}
