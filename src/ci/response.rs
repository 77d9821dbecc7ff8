//! CI response types and error classification

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a CI failure, derived from the transport status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    Timeout,
    Other,
}

impl CiErrorKind {
    /// Classify an HTTP status code
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => CiErrorKind::Unauthorized,
            403 => CiErrorKind::Forbidden,
            404 => CiErrorKind::NotFound,
            408 | 504 => CiErrorKind::Timeout,
            _ => CiErrorKind::Other,
        }
    }
}

impl fmt::Display for CiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CiErrorKind::Unauthorized => "unauthorized",
            CiErrorKind::Forbidden => "forbidden",
            CiErrorKind::NotFound => "not_found",
            CiErrorKind::Timeout => "timeout",
            CiErrorKind::Other => "other",
        };
        f.write_str(label)
    }
}

/// Error types for CI operations
#[derive(Debug, Clone, Error)]
pub enum CiError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl CiError {
    /// Build an error of the given classification
    pub fn new(kind: CiErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            CiErrorKind::Unauthorized => CiError::Unauthorized(message),
            CiErrorKind::Forbidden => CiError::Forbidden(message),
            CiErrorKind::NotFound => CiError::NotFound(message),
            CiErrorKind::Timeout => CiError::Timeout(message),
            CiErrorKind::Other => CiError::Other(message),
        }
    }

    /// Build an error from a non-success HTTP status
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(CiErrorKind::from_status(status), message)
    }

    pub fn kind(&self) -> CiErrorKind {
        match self {
            CiError::Unauthorized(_) => CiErrorKind::Unauthorized,
            CiError::Forbidden(_) => CiErrorKind::Forbidden,
            CiError::NotFound(_) => CiErrorKind::NotFound,
            CiError::Timeout(_) => CiErrorKind::Timeout,
            CiError::Other(_) => CiErrorKind::Other,
        }
    }
}

impl From<reqwest::Error> for CiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return CiError::Timeout(err.to_string());
        }
        match err.status() {
            Some(status) => CiError::from_status(status.as_u16(), err.to_string()),
            None => CiError::Other(err.to_string()),
        }
    }
}

/// Handle of a triggered pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineHandle {
    pub project: String,
    pub pipeline_id: u64,
    pub web_url: String,
}

/// Observed state of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Raw status reported by the CI system
    pub status: String,
    pub terminal: bool,
    pub succeeded: bool,
}

impl PipelineStatus {
    /// Interpret a GitLab pipeline or job status string
    pub fn from_gitlab(status: &str) -> Self {
        Self {
            status: status.to_string(),
            terminal: matches!(status, "success" | "failed" | "canceled"),
            succeeded: status == "success",
        }
    }
}

/// A job within a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineJob {
    pub id: u64,
    pub stage: String,
    pub succeeded: bool,
    pub web_url: Option<String>,
}
