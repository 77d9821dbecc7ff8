//! orchestrator - cross-application test flows driven through CI pipelines

pub mod ci;
pub mod cli;
pub mod core;
pub mod execution;
pub mod logs;
pub mod persistence;

// Re-export commonly used types
pub use ci::{CiError, CiErrorKind, GitLabClient, MockPipelineClient, PipelineClient};
pub use crate::core::{ExecutionStatus, FlowExecution, OrchestratorError, PipelineExecution};
pub use execution::{AdmissionController, FlowExecutionCoordinator, ReplayCoordinator, WorkerPool};
pub use logs::{ExecutionLog, LogBroadcastHub};
