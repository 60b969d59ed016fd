//! CLI module for ferry
//!
//! This module provides the command-line interface: argument parsing and
//! the translation of flags into configuration overrides.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use ferry::config::Settings;
use humantime_serde::re::humantime;

/// ferry - run a playbook against a fleet of hosts over SSH
///
/// Hosts are processed in batches of at most `--max-concurrent-connections`;
/// each host runs the whole playbook and stops at its first failed action.
#[derive(Parser, Debug, Clone)]
#[command(name = "ferry")]
#[command(author = "Ferry Contributors")]
#[command(version)]
#[command(about = "Run a playbook against a fleet of hosts over SSH", long_about = None)]
pub struct Cli {
    /// Playbook file to run
    pub playbook: PathBuf,

    /// Path to the inventory file
    #[arg(short = 'i', long, env = "FERRY_INVENTORY")]
    pub inventory: Option<PathBuf>,

    /// Bound on establishing one connection (e.g. "5s")
    #[arg(short = 'c', long, value_parser = parse_duration)]
    pub connect_timeout: Option<Duration>,

    /// Bound on one action (e.g. "5m")
    #[arg(short = 'e', long, value_parser = parse_duration)]
    pub exec_timeout: Option<Duration>,

    /// Hosts connected and run per batch
    #[arg(short = 'm', long)]
    pub max_concurrent_connections: Option<usize>,

    /// Path to a TOML configuration file
    #[arg(long, env = "FERRY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

fn parse_duration(value: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(value)
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-2)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(2)
    }

    /// Settings given on the command line; unset flags stay `None`.
    pub fn settings(&self) -> Settings {
        Settings {
            inventory: self.inventory.clone(),
            connect_timeout: self.connect_timeout,
            exec_timeout: self.exec_timeout,
            max_concurrent_connections: self.max_concurrent_connections,
        }
    }
}
