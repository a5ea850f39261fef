use anyhow::{Context, Result};
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

use crate::compose::ComposeStack;
use crate::config;
use crate::config::resolve::{resolve_config, StackPaths};
use crate::identity::ProjectIdentity;
use crate::orchestrator::registry::{ProcessRecord, RegistryFile};
use crate::platform;

fn record_table(records: &[&ProcessRecord], use_color: bool) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Service"),
        Cell::new("Group").set_alignment(CellAlignment::Right),
        Cell::new("Attempt").set_alignment(CellAlignment::Right),
        Cell::new("Started"),
        Cell::new("Status").set_alignment(CellAlignment::Center),
    ]);

    for record in records {
        let alive = platform::is_target_alive(record.target());
        let status = match (alive, use_color) {
            (true, true) => format!("{}", "running".green()),
            (false, true) => format!("{}", "dead".red()),
            (true, false) => "running".to_string(),
            (false, false) => "dead".to_string(),
        };
        table.add_row(vec![
            Cell::new(&record.label),
            Cell::new(record.group_id).set_alignment(CellAlignment::Right),
            Cell::new(record.attempt).set_alignment(CellAlignment::Right),
            Cell::new(
                record
                    .started_at
                    .with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M:%S"),
            ),
            Cell::new(status),
        ]);
    }
    table
}

pub async fn run(config_file: Option<&Path>, registry_override: Option<PathBuf>) -> Result<()> {
    let config_path = resolve_config(config_file)?;
    let (config, _) = config::load_config(&config_path)?;
    let identity = ProjectIdentity::from_config(&config, &config_path)
        .context("computing project identity")?;
    let paths = StackPaths::resolve(
        &identity.config_path,
        &config,
        None,
        registry_override.as_deref(),
    );
    let use_color = std::io::stdout().is_terminal();

    match RegistryFile::load(&paths.registry_file) {
        Some(file) if !file.records.is_empty() => {
            let owner = if platform::is_process_alive(file.owner_pid) {
                "running"
            } else {
                "gone"
            };
            println!(
                "  {} ({}), orchestrator pid {} ({})",
                identity.name, identity.id, file.owner_pid, owner
            );
            println!();
            let records: Vec<&ProcessRecord> = file.records.values().collect();
            for line in record_table(&records, use_color).to_string().lines() {
                println!("  {}", line);
            }
            println!();
        }
        _ => {
            println!("No running services found.");
            println!("Run `stackrig start` to start services.");
        }
    }

    if let Some(infra) = &config.infra {
        let stack = ComposeStack::new(infra, &paths.project_dir, &identity.compose_project());
        match stack.ps().await {
            Ok(services) if !services.is_empty() => {
                println!("  Infrastructure ({}):", stack.project_name());
                for svc in services {
                    let health = if svc.health.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", svc.health)
                    };
                    println!("    {:<20} {}{}", svc.service, svc.state, health);
                }
                println!();
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("could not query compose: {:#}", e),
        }
    }

    Ok(())
}
