//! Live execution logs

pub mod context;
pub mod hub;

pub use context::ExecutionLog;
pub use hub::{LogBroadcastHub, LogSubscription};
