//! In-process pipeline client used in mock mode

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::{
    CiError, PipelineClient, PipelineHandle, PipelineJob, PipelineStatus, TEST_STAGE_VARIABLE,
};

#[derive(Debug)]
struct MockPipeline {
    stage: String,
    polls: u32,
}

/// Simulates pipelines that succeed after a fixed number of status checks
#[derive(Debug)]
pub struct MockPipelineClient {
    polls_to_complete: u32,
    next_id: AtomicU64,
    pipelines: Mutex<HashMap<u64, MockPipeline>>,
}

impl MockPipelineClient {
    pub fn new(polls_to_complete: u32) -> Self {
        let seed = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(1);
        Self {
            polls_to_complete,
            next_id: AtomicU64::new(seed),
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<u64, MockPipeline>>, CiError> {
        self.pipelines
            .lock()
            .map_err(|_| CiError::Other("mock pipeline registry poisoned".to_string()))
    }
}

impl Default for MockPipelineClient {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl PipelineClient for MockPipelineClient {
    async fn trigger(
        &self,
        project: &str,
        branch: &str,
        _token: &str,
        variables: &HashMap<String, String>,
    ) -> Result<PipelineHandle, CiError> {
        let pipeline_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stage = variables
            .get(TEST_STAGE_VARIABLE)
            .cloned()
            .unwrap_or_else(|| "test".to_string());

        self.lock()?.insert(pipeline_id, MockPipeline { stage, polls: 0 });
        info!(
            "MOCK: pipeline {} triggered for project {} on branch {}",
            pipeline_id, project, branch
        );

        Ok(PipelineHandle {
            project: project.to_string(),
            pipeline_id,
            web_url: format!("https://gitlab.com/{}/-/pipelines/{}", project, pipeline_id),
        })
    }

    async fn poll(&self, handle: &PipelineHandle, _token: &str) -> Result<PipelineStatus, CiError> {
        let mut pipelines = self.lock()?;
        let pipeline = pipelines
            .get_mut(&handle.pipeline_id)
            .ok_or_else(|| CiError::NotFound(format!("pipeline {}", handle.pipeline_id)))?;
        pipeline.polls += 1;

        let status = if pipeline.polls >= self.polls_to_complete {
            "success"
        } else {
            "running"
        };
        Ok(PipelineStatus::from_gitlab(status))
    }

    async fn list_jobs(&self, handle: &PipelineHandle, _token: &str) -> Result<Vec<PipelineJob>, CiError> {
        let pipelines = self.lock()?;
        let pipeline = pipelines
            .get(&handle.pipeline_id)
            .ok_or_else(|| CiError::NotFound(format!("pipeline {}", handle.pipeline_id)))?;

        Ok(vec![PipelineJob {
            id: handle.pipeline_id,
            stage: pipeline.stage.clone(),
            succeeded: true,
            web_url: Some(format!("{}/-/jobs/{}", handle.project, handle.pipeline_id)),
        }])
    }

    async fn fetch_artifact(
        &self,
        _project: &str,
        job_id: u64,
        _path: &str,
        _token: &str,
    ) -> Result<String, CiError> {
        let millis = Utc::now().timestamp_millis();
        let session = Uuid::new_v4().simple().to_string();
        Ok(format!(
            "MOCK_USER_ID=user_{}\nMOCK_SESSION_TOKEN=token_{}\nMOCK_TRANSACTION_ID=txn_{}_{}\n",
            millis,
            &session[..8],
            millis,
            job_id
        ))
    }
}
