//! Explicit per-execution log context

use chrono::Utc;
use tracing::{debug, error, info, warn, Level};
use uuid::Uuid;

use super::LogBroadcastHub;

/// Log handle bound to one execution.
///
/// Every line goes to `tracing` tagged with the execution id and to the
/// execution's live subscribers.
#[derive(Debug, Clone)]
pub struct ExecutionLog {
    execution_id: Uuid,
    hub: LogBroadcastHub,
}

impl ExecutionLog {
    pub fn new(execution_id: Uuid, hub: LogBroadcastHub) -> Self {
        Self { execution_id, hub }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!(execution_id = %self.execution_id, "{}", message);
        self.publish(Level::INFO, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!(execution_id = %self.execution_id, "{}", message);
        self.publish(Level::WARN, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        error!(execution_id = %self.execution_id, "{}", message);
        self.publish(Level::ERROR, message);
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        debug!(execution_id = %self.execution_id, "{}", message);
        self.publish(Level::DEBUG, message);
    }

    fn publish(&self, level: Level, message: &str) {
        self.hub
            .publish(self.execution_id, &format_line(level, message));
    }
}

/// `<timestamp> <LEVEL> <message>`
pub fn format_line(level: Level, message: &str) -> String {
    format!(
        "{} {:<5} {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        level.to_string(),
        message
    )
}
