//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use optimizer_lib::engine::CycleState;
use optimizer_lib::ActionKind;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Two-column row for key/value summaries
#[derive(Tabled)]
pub struct FieldRow {
    #[tabled(rename = "Field")]
    pub field: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

impl FieldRow {
    pub fn new(field: &str, value: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            value: value.into(),
        }
    }
}

/// Render rows as a rounded table
pub fn table<T: Tabled>(rows: impl IntoIterator<Item = T>) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a utilization percentage, `no data` when absent
pub fn format_percent(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}%", v),
        None => "no data".to_string(),
    }
}

/// Format a duration as whole seconds or minutes
pub fn format_secs(secs: u64) -> String {
    if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// Color a cycle state by how much it changed
pub fn color_state(state: CycleState) -> String {
    let label = state.as_str();
    match state {
        CycleState::Acted => label.green().bold().to_string(),
        CycleState::Blocked | CycleState::NoData => label.yellow().to_string(),
        CycleState::Recommended => label.blue().to_string(),
        _ => label.to_string(),
    }
}

pub fn color_action(action: ActionKind) -> String {
    match action {
        ActionKind::ScaleUp | ActionKind::ResizeUp => action.as_str().red().to_string(),
        ActionKind::ScaleDown | ActionKind::ResizeDown => action.as_str().cyan().to_string(),
        ActionKind::DoNothing => action.as_str().dimmed().to_string(),
    }
}

/// Color a per-workload outcome label
pub fn color_outcome(label: &str) -> String {
    match label {
        "applied" => label.green().to_string(),
        "skipped" => label.yellow().to_string(),
        "failed" => label.red().to_string(),
        _ => label.to_string(),
    }
}
