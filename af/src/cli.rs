//! CLI command definitions and subcommands

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;

/// autofetch - keep remote data fresh on a shared polling schedule
#[derive(Parser)]
#[command(
    name = "af",
    about = "Auto-refreshing data fetch with persisted global polling settings",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show or change the global auto-fetch settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },

    /// Poll a JSON endpoint and print every state change
    Watch(WatchArgs),
}

/// Global settings subcommands
#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// Print the current settings
    Show {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Set the polling interval in milliseconds
    Interval {
        #[arg(value_name = "MS")]
        ms: u64,
    },

    /// Permit automatic polling
    Enable,

    /// Stop automatic polling everywhere
    Disable,

    /// Flip the global enabled flag
    Toggle,
}

/// Arguments for `af watch`
#[derive(Debug, clap::Args)]
pub struct WatchArgs {
    /// URL to GET
    pub url: String,

    /// Interval override in milliseconds (default follows the global setting)
    #[arg(short, long)]
    pub interval_ms: Option<u64>,

    /// Query parameter taken from the dependency key, as name=value
    #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, Value)>,

    /// JSON pointer to the list to display, e.g. /data/spots
    #[arg(long = "items", value_name = "POINTER")]
    pub items: Option<String>,

    /// Case-insensitive filter, as field=text or text
    #[arg(long)]
    pub filter: Option<String>,

    /// Field to sort by
    #[arg(long)]
    pub sort: Option<String>,

    /// Sort descending
    #[arg(long)]
    pub desc: bool,

    /// Page to show (1-based)
    #[arg(long, default_value = "1")]
    pub page: usize,

    /// Items per page
    #[arg(long, default_value = "20")]
    pub page_size: usize,

    /// Producer timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Print state changes without taking over the terminal
    #[arg(long)]
    pub plain: bool,
}

/// Output format for commands that support it
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Parse `name=value`; the value becomes a JSON scalar when it looks like one
pub fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    if name.is_empty() {
        return Err(format!("parameter name is empty in '{}'", raw));
    }
    let value = match serde_json::from_str::<Value>(value) {
        Ok(v @ (Value::Null | Value::Bool(_) | Value::Number(_))) => v,
        _ => Value::String(value.to_string()),
    };
    Ok((name.to_string(), value))
}
