//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{BatchCommand, HistoryCommand, ReplayCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

use crate::core::config::Settings;

/// Cross-application test flow orchestrator
#[derive(Debug, Parser, Clone)]
#[command(name = "orchestrator")]
#[command(version)]
#[command(about = "Runs multi-step test flows through branch-triggered CI pipelines", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to orchestrator configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Use the built-in mock CI client
    #[arg(long, global = true)]
    pub mock: bool,

    /// Override the number of concurrent flow executions
    #[arg(long, global = true)]
    pub max_workers: Option<usize>,

    /// Override the number of queued flow executions
    #[arg(long, global = true)]
    pub queue_capacity: Option<usize>,

    /// Override the pipeline poll interval in seconds
    #[arg(long, global = true)]
    pub poll_interval: Option<u64>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Validate the configuration
    Validate(ValidateCommand),

    /// Run one flow
    Run(RunCommand),

    /// Submit several flows at once
    Batch(BatchCommand),

    /// Replay a failed execution from a step
    Replay(ReplayCommand),

    /// Show execution history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }

    /// Apply command-line overrides to loaded settings
    pub fn apply_overrides(&self, settings: &mut Settings) {
        if self.mock {
            settings.mock_mode = true;
        }
        if let Some(max_workers) = self.max_workers {
            settings.max_workers = max_workers;
        }
        if let Some(queue_capacity) = self.queue_capacity {
            settings.queue_capacity = queue_capacity;
        }
        if let Some(poll_interval) = self.poll_interval {
            settings.poll_interval_secs = poll_interval;
        }
    }
}
