//! CLI output formatting

use crate::core::{ExecutionStatus, FlowExecution, StepProgress};
use crate::execution::{PoolStatus, Rejection};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a spinner showing the latest log line
pub fn create_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        spinner.set_style(template);
    }
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Passed => style("PASSED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
        ExecutionStatus::Scheduled => style("SCHEDULED").blue().to_string(),
    }
}

fn status_icon(status: ExecutionStatus) -> &'static Emoji<'static, 'static> {
    match status {
        ExecutionStatus::Passed => &CHECK,
        ExecutionStatus::Failed => &CROSS,
        ExecutionStatus::Running | ExecutionStatus::Scheduled => &SPINNER,
        _ => &INFO,
    }
}

/// One-line summary of a flow execution
pub fn format_execution(execution: &FlowExecution) -> String {
    let replay = match execution.original_execution_id {
        Some(original) if execution.is_replay => format!(
            " {}",
            style(format!("(replay of {})", &original.to_string()[..8])).dim()
        ),
        _ => String::new(),
    };

    format!(
        "{} {} - flow {} - {} - {}{}",
        status_icon(execution.status),
        style(&execution.id.to_string()[..8]).dim(),
        style(execution.flow_id).bold(),
        format_status(execution.status),
        style(execution.start_time.format("%Y-%m-%d %H:%M:%S")).dim(),
        replay
    )
}

/// One line per flow step
pub fn format_step_progress(step: &StepProgress) -> String {
    let mut line = format!(
        "{}. step {} - {}",
        step.index + 1,
        style(step.step_id).cyan(),
        format_status(step.status)
    );

    if let Some(record) = &step.record {
        if record.carried {
            line.push_str(&format!(" {}", style("(carried)").dim()));
        }
        if let Some(url) = &record.pipeline_url {
            line.push_str(&format!(" {}", style(url).underlined()));
        }
        if let Some(resume) = record.resume_time {
            if record.status == ExecutionStatus::Scheduled {
                line.push_str(&format!(" resumes {}", resume.format("%Y-%m-%d %H:%M:%S")));
            }
        }
    }
    line
}

pub fn format_rejection(rejection: &Rejection) -> String {
    format!(
        "{} flow {} - {}: {}",
        CROSS,
        style(rejection.flow_id).bold(),
        style(rejection.reason.as_str()).red(),
        rejection.message
    )
}

pub fn format_pool_status(pool: &PoolStatus) -> String {
    format!(
        "workers {}/{}, queued {}/{}, available {}",
        pool.active_workers,
        pool.max_workers,
        pool.queue_size,
        pool.queue_capacity,
        style(pool.available_capacity).cyan()
    )
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
