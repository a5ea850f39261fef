use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use std::path::Path;

use crate::identity::ProjectIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Healthy,
    Running,
    /// Health check timed out but the check is not required.
    Unhealthy,
    /// Exited 0 during startup and was not restarted.
    Completed,
    Disabled,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Healthy => "healthy",
            RowStatus::Running => "running",
            RowStatus::Unhealthy => "unhealthy",
            RowStatus::Completed => "completed",
            RowStatus::Disabled => "disabled",
        }
    }

    fn colored(&self, use_color: bool) -> String {
        let text = self.as_str();
        if !use_color {
            return format!("\u{25cf} {}", text);
        }
        match self {
            RowStatus::Healthy | RowStatus::Running => {
                format!("{} {}", "\u{25cf}".green(), text.green())
            }
            RowStatus::Unhealthy => format!("{} {}", "\u{25cf}".yellow(), text.yellow()),
            RowStatus::Completed | RowStatus::Disabled => {
                format!("{} {}", "\u{25cf}".dimmed(), text.dimmed())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub name: String,
    /// `infra` or `service`.
    pub tier: &'static str,
    pub health: Option<String>,
    pub group: Option<i32>,
    pub status: RowStatus,
}

pub fn render_table(rows: &[SummaryRow], use_color: bool) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Name").set_alignment(CellAlignment::Left),
        Cell::new("Tier").set_alignment(CellAlignment::Left),
        Cell::new("Health").set_alignment(CellAlignment::Left),
        Cell::new("Group").set_alignment(CellAlignment::Right),
        Cell::new("Status").set_alignment(CellAlignment::Center),
    ]);

    for row in rows {
        table.add_row(vec![
            Cell::new(&row.name),
            Cell::new(row.tier),
            Cell::new(row.health.as_deref().unwrap_or("-")),
            Cell::new(
                row.group
                    .map(|g| g.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            )
            .set_alignment(CellAlignment::Right),
            Cell::new(row.status.colored(use_color)),
        ]);
    }
    table
}

pub fn print_startup_summary(identity: &ProjectIdentity, rows: &[SummaryRow], log_dir: &Path) {
    let use_color = std::io::stdout().is_terminal();

    println!();
    if use_color {
        println!(
            "  {} {} ({})",
            "stackrig".bold(),
            identity.name.cyan(),
            identity.id.dimmed()
        );
    } else {
        println!("  stackrig {} ({})", identity.name, identity.id);
    }
    println!();

    // Indent the table by 2 spaces
    for line in render_table(rows, use_color).to_string().lines() {
        println!("  {}", line);
    }

    println!();
    println!("  Logs: {}", log_dir.display());
    if use_color {
        println!("  Press {} to stop", "Ctrl+C".bold());
    } else {
        println!("  Press Ctrl+C to stop");
    }
    println!();
}
