//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table of rows, or a raw value as JSON
pub fn print_table<T: Tabled, V: Serialize>(rows: Vec<T>, raw: &V, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => print_json(raw),
    }
}

pub fn print_json<V: Serialize>(value: &V) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => print_error(&format!("Failed to render JSON: {}", e)),
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Queue capacity, `∞` for unbounded queues
pub fn format_capacity(capacity: Option<usize>) -> String {
    capacity.map(|c| c.to_string()).unwrap_or_else(|| "∞".to_string())
}

/// Usage as a rounded percentage of a limit
pub fn percent(used: usize, limit: usize) -> u32 {
    if limit == 0 {
        return 0;
    }
    ((used as f64 / limit as f64) * 100.0).round() as u32
}

/// `used/limit` colored by how close usage is to the limit
pub fn color_usage(used: usize, limit: Option<usize>) -> String {
    let Some(limit) = limit else {
        return used.to_string();
    };

    let formatted = format!("{}/{}", used, limit);
    match percent(used, limit) {
        p if p >= 80 => formatted.red().to_string(),
        p if p >= 60 => formatted.yellow().to_string(),
        _ => formatted.green().to_string(),
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "applied" | "running" => status.green().to_string(),
        "degraded" | "unchanged" => status.yellow().to_string(),
        "unhealthy" | "terminated" | "failed" => status.red().to_string(),
        _ => status.to_string(),
    }
}
