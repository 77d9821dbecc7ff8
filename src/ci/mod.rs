//! CI system client for triggering and observing pipelines

pub mod client;
pub mod credentials;
pub mod gitlab;
pub mod mock;
pub mod response;

use async_trait::async_trait;
use std::collections::HashMap;

pub use client::CiClientConfig;
pub use credentials::{CredentialProvider, EnvCredentialProvider, StaticCredentialProvider};
pub use gitlab::GitLabClient;
pub use mock::MockPipelineClient;
pub use response::{CiError, CiErrorKind, PipelineHandle, PipelineJob, PipelineStatus};

/// Trigger variable carrying the step's test tag
pub const TEST_TAG_VARIABLE: &str = "TEST_TAG";

/// Trigger variable carrying the step's test stage
pub const TEST_STAGE_VARIABLE: &str = "TEST_STAGE";

/// Trait for CI access - allows for different implementations
#[async_trait]
pub trait PipelineClient: Send + Sync {
    /// Start a pipeline on `branch` with the given variables
    async fn trigger(
        &self,
        project: &str,
        branch: &str,
        token: &str,
        variables: &HashMap<String, String>,
    ) -> Result<PipelineHandle, CiError>;

    /// Read the current pipeline status
    async fn poll(&self, handle: &PipelineHandle, token: &str) -> Result<PipelineStatus, CiError>;

    /// List the jobs of a pipeline
    async fn list_jobs(&self, handle: &PipelineHandle, token: &str) -> Result<Vec<PipelineJob>, CiError>;

    /// Download one artifact file of a job as text
    async fn fetch_artifact(
        &self,
        project: &str,
        job_id: u64,
        path: &str,
        token: &str,
    ) -> Result<String, CiError>;
}
