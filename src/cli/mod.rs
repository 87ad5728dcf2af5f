//! CLI definition and argument parsing helpers

pub mod run;

use crate::core::error::{Error, Result};
use crate::execution::Mode;
use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::Parser;
use std::path::PathBuf;

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default())
}

/// Automation and orchestration framework: select hosts with a composite
/// query and run commands on them in parallel
#[derive(Parser, Debug)]
#[command(name = "cumin")]
#[command(author, version, about, long_about = None)]
#[command(styles = styles())]
pub struct Cli {
    /// Host selection query
    pub query: String,

    /// Commands to execute on the matched hosts; with none given, the
    /// matched hosts are only listed (dry-run)
    pub commands: Vec<String>,

    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Execution mode: sync waits for each command to meet the success
    /// threshold before the next one; async pipelines commands per host
    #[arg(short = 'm', long, value_enum, default_value = "sync")]
    pub mode: ExecutionMode,

    /// Hosts per batch window: an absolute count or a percentage ("25%")
    #[arg(short = 'b', long, value_name = "SIZE")]
    pub batch_size: Option<String>,

    /// Seconds to sleep between host starts within a batch
    #[arg(short = 's', long, value_name = "SECONDS", default_value_t = 0.0)]
    pub batch_sleep: f64,

    /// Per-command timeout in seconds
    #[arg(short = 't', long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Timeout in seconds for the whole run
    #[arg(long, value_name = "SECONDS")]
    pub global_timeout: Option<u64>,

    /// Success threshold: a ratio in [0, 1] or a percentage ("95%" or 95)
    #[arg(short = 'p', long, value_name = "THRESHOLD", default_value = "100%")]
    pub success_threshold: String,

    /// Treat any exit code as success
    #[arg(short = 'x', long)]
    pub ignore_exit_codes: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Only resolve and list the matched hosts
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the interactive confirmation
    #[arg(long)]
    pub force: bool,

    /// Verbose logging
    #[arg(short = 'd', long)]
    pub debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExecutionMode {
    Sync,
    Async,
}

impl From<ExecutionMode> for Mode {
    fn from(mode: ExecutionMode) -> Self {
        match mode {
            ExecutionMode::Sync => Mode::Sync,
            ExecutionMode::Async => Mode::Async,
        }
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable grouped report
    Text,
    /// One JSON document per run
    Json,
    /// Only failures
    Quiet,
}

/// A batch size argument, before resolution against the target
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BatchSize {
    Absolute(usize),
    Ratio(f64),
}

/// Parse `N` or `N%`
pub fn parse_batch_size(text: &str) -> Result<BatchSize> {
    let invalid = || Error::config(format!("invalid batch size '{text}'"));
    match text.strip_suffix('%') {
        Some(percent) => {
            let percent: f64 = percent.parse().map_err(|_| invalid())?;
            if !(percent > 0.0 && percent <= 100.0) {
                return Err(invalid());
            }
            Ok(BatchSize::Ratio(percent / 100.0))
        }
        None => {
            let size: usize = text.parse().map_err(|_| invalid())?;
            if size == 0 {
                return Err(invalid());
            }
            Ok(BatchSize::Absolute(size))
        }
    }
}

/// Parse a success threshold: a ratio in [0, 1] (`0.95`), a percentage
/// with suffix (`95%`) or a bare percentage above 1 (`95`)
pub fn parse_threshold(text: &str) -> Result<f64> {
    let invalid = || Error::config(format!("invalid success threshold '{text}'"));
    let value = match text.strip_suffix('%') {
        Some(percent) => percent.parse::<f64>().map_err(|_| invalid())? / 100.0,
        None => {
            let value: f64 = text.parse().map_err(|_| invalid())?;
            if value > 1.0 {
                value / 100.0
            } else {
                value
            }
        }
    };
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid());
    }
    Ok(value)
}
