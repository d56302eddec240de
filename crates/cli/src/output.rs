//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
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

/// Print a table from a list of items
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => print_json(&items),
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    if let Ok(json) = serde_json::to_string_pretty(value) {
        println!("{}", json);
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

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format mebibytes as human-readable string
pub fn format_mebibytes(mb: i64) -> String {
    if mb >= 1024 {
        format!("{:.1}Gi", mb as f64 / 1024.0)
    } else {
        format!("{}Mi", mb)
    }
}

/// Format an hourly or total USD amount
pub fn format_usd(amount: f64) -> String {
    format!("${:.4}", amount)
}

/// Color a validation verdict
pub fn color_verdict(valid: bool) -> String {
    if valid {
        "valid".green().to_string()
    } else {
        "invalid".red().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mebibytes() {
        assert_eq!(format_mebibytes(512), "512Mi");
        assert_eq!(format_mebibytes(4096), "4.0Gi");
        assert_eq!(format_mebibytes(1536), "1.5Gi");
    }

    #[test]
    fn test_format_usd() {
        assert_eq!(format_usd(0.111), "$0.1110");
        assert_eq!(format_usd(0.0), "$0.0000");
    }
}
