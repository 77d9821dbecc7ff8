//! Orchestrator error taxonomy

use thiserror::Error;

use crate::ci::CiError;

/// Errors surfaced by the orchestration core
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Unknown flow, step, application or execution
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the current state, or malformed batch input
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("external system error: {0}")]
    ExternalSystem(#[from] CiError),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("persistence error: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Whether the error maps to a client-side (4xx) failure
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            OrchestratorError::NotFound(_)
                | OrchestratorError::InvalidState(_)
                | OrchestratorError::InvalidArgument(_)
        )
    }
}
