//! CLI command definitions

use clap::Args;

use crate::core::{ExecutionStatus, FlowId, StepId};

/// Validate the configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Run one flow
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Flow id to execute
    #[arg(short, long)]
    pub flow: FlowId,

    /// Don't save execution to history
    #[arg(long)]
    pub no_history: bool,
}

/// Submit several flows at once
#[derive(Debug, Args, Clone)]
pub struct BatchCommand {
    /// Comma separated flow ids, e.g. 1,2,3
    #[arg(short, long)]
    pub trigger: String,

    /// Don't save executions to history
    #[arg(long)]
    pub no_history: bool,
}

/// Replay a failed execution
#[derive(Debug, Args, Clone)]
pub struct ReplayCommand {
    /// Id of the failed execution
    #[arg(short, long)]
    pub execution: String,

    /// Step to resume from
    #[arg(short, long)]
    pub step: StepId,
}

/// Show execution history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Flow id to filter by
    #[arg(short, long)]
    pub flow: Option<FlowId>,

    /// Status to filter by
    #[arg(long, value_parser = parse_status)]
    pub status: Option<ExecutionStatus>,

    /// Number of recent executions to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show step progress for one execution
    #[arg(long)]
    pub execution: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse an execution status name
pub fn parse_status(s: &str) -> Result<ExecutionStatus, String> {
    s.parse()
}
