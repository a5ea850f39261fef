use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

use crate::config;
use crate::config::model::StackConfig;
use crate::config::resolve::{resolve_config, CONFIG_FILENAME};
use crate::config::validate::validate;

/// One line per service in launch order, e.g. `core  http://localhost:8000/health`.
fn launch_plan(config: &StackConfig) -> Vec<String> {
    config
        .services
        .iter()
        .enumerate()
        .map(|(i, svc)| {
            let health = svc
                .health
                .as_ref()
                .map(|h| h.describe())
                .unwrap_or_else(|| "no health check".to_string());
            let optional = if svc.optional { " (optional)" } else { "" };
            format!("{}. {}{}  {}", i + 1, svc.name, optional, health)
        })
        .collect()
}

pub fn run(config_file: Option<&Path>) -> Result<()> {
    let config_path = resolve_config(config_file)?;
    let (config, source) = config::load_config(&config_path)?;

    let filename = config_path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| CONFIG_FILENAME.to_string());

    if let Err(errors) = validate(&config, &source, &filename) {
        let count = errors.len();
        for err in errors {
            let report: miette::Report = err.into();
            eprintln!("{:?}", report);
        }
        eprintln!("{} {} error(s) in {}", "\u{2717}".red(), count, filename);
        std::process::exit(1);
    }

    let infra_checks = config.infra.as_ref().map_or(0, |i| i.health.len());
    println!(
        "  {} {} is valid ({} services, {} setup steps, {} infra checks)",
        "\u{2713}".green(),
        filename,
        config.services.len(),
        config.setup.len(),
        infra_checks,
    );
    for line in launch_plan(&config) {
        println!("    {}", line.dimmed());
    }
    Ok(())
}
