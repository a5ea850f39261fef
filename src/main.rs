use clap::{CommandFactory, Parser};
use clap_complete::aot::generate;
use stackrig::cli::{normalize_args, Cli, Commands, StartArgs};
use stackrig::commands;
use stackrig::config::resolve::resolve_config;
use stackrig::orchestrator::{Orchestrator, StartOptions};
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with env-filter support.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_from(normalize_args(std::env::args_os()));
    let config_file = cli.global.config_file;
    let registry = cli.global.registry;

    let result = match cli.command {
        Commands::Start(args) => run_start(config_file, registry, args).await,
        Commands::Stop { keep_infra } => run_stop(config_file, registry, keep_infra).await,
        Commands::Ps => commands::ps::run(config_file.as_deref(), registry).await,
        Commands::Doctor => commands::doctor::run(config_file.as_deref()),
        Commands::Validate => commands::validate::run(config_file.as_deref()),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "stackrig", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_start(
    config_file: Option<PathBuf>,
    registry: Option<PathBuf>,
    args: StartArgs,
) -> anyhow::Result<()> {
    let config_path = resolve_config(config_file.as_deref())?;
    let options = StartOptions {
        skip_deps: args.skip_deps,
        skip_migrations: args.skip_migrations,
        keep_infra: args.keep_infra,
        disabled: args.disabled,
        max_restarts: args.max_restarts,
        restart_delay: args.restart_delay,
        health_timeout: args.health_timeout,
        env_file: args.env_file,
        log_dir: args.log_dir,
        registry_file: registry,
    };
    let orchestrator = Orchestrator::from_config(config_path, options)?;
    orchestrator.start().await
}

async fn run_stop(
    config_file: Option<PathBuf>,
    registry: Option<PathBuf>,
    keep_infra: bool,
) -> anyhow::Result<()> {
    let config_path = resolve_config(config_file.as_deref())?;
    Orchestrator::stop(config_path, keep_infra, registry).await
}
