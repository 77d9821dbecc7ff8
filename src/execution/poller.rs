//! Pipeline completion polling and artifact ingestion

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::ci::{CiError, PipelineClient, PipelineHandle};
use crate::core::config::Settings;
use crate::core::{ArtifactParser, OrchestratorError, PipelineExecution, VariableStore, OUTPUT_ENV_PATH};
use crate::logs::ExecutionLog;
use crate::persistence::ExecutionRepository;

/// Everything the poller needs to finish one step record
pub struct PollRequest {
    pub record: PipelineExecution,
    pub handle: PipelineHandle,
    pub token: String,
    pub test_stage: String,
    pub log: ExecutionLog,
}

/// Watches a triggered pipeline until it reaches a terminal status.
///
/// Runs as its own task and owns the step record from hand-off until the
/// record is terminal.
pub struct PipelinePoller<C> {
    client: Arc<C>,
    repository: Arc<dyn ExecutionRepository>,
    interval: Duration,
    max_attempts: Option<u32>,
}

impl<C> Clone for PipelinePoller<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            repository: self.repository.clone(),
            interval: self.interval,
            max_attempts: self.max_attempts,
        }
    }
}

impl<C: PipelineClient + 'static> PipelinePoller<C> {
    pub fn new(client: Arc<C>, repository: Arc<dyn ExecutionRepository>, settings: &Settings) -> Self {
        Self {
            client,
            repository,
            interval: settings.poll_interval(),
            max_attempts: settings.max_poll_attempts,
        }
    }

    /// Start polling on a separate task
    pub fn spawn(&self, request: PollRequest) -> JoinHandle<Result<PipelineExecution, OrchestratorError>> {
        let poller = self.clone();
        tokio::spawn(async move { poller.run(request).await })
    }

    /// Poll until terminal, then persist the finished record
    pub async fn run(&self, request: PollRequest) -> Result<PipelineExecution, OrchestratorError> {
        let PollRequest {
            mut record,
            handle,
            token,
            test_stage,
            log,
        } = request;

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;

            match self.client.poll(&handle, &token).await {
                Ok(status) if status.terminal => {
                    if status.succeeded {
                        let runtime = self.ingest(&record, &handle, &token, &test_stage, &log).await;
                        record.pass(runtime);
                        log.info(format!(
                            "Pipeline {} for step {} succeeded",
                            handle.pipeline_id, record.flow_step_id
                        ));
                    } else {
                        record.fail();
                        log.error(format!(
                            "Pipeline {} for step {} finished with status {}",
                            handle.pipeline_id, record.flow_step_id, status.status
                        ));
                    }
                    break;
                }
                Ok(status) => {
                    log.debug(format!(
                        "Pipeline {} status: {} (check {})",
                        handle.pipeline_id, status.status, attempts
                    ));
                }
                Err(err) => {
                    record.fail();
                    log.error(format!(
                        "Polling pipeline {} failed ({}): {}",
                        handle.pipeline_id,
                        err.kind(),
                        err
                    ));
                    break;
                }
            }

            if let Some(max) = self.max_attempts {
                if attempts >= max {
                    let err = CiError::Timeout(format!(
                        "pipeline {} not finished after {} checks",
                        handle.pipeline_id, attempts
                    ));
                    record.fail();
                    log.error(format!("Polling stopped ({}): {}", err.kind(), err));
                    break;
                }
            }

            tokio::time::sleep(self.interval).await;
        }

        self.repository.save_pipeline_execution(&record).await?;
        Ok(record)
    }

    /// Runtime data for a succeeded pipeline: configured data overlaid with
    /// the artifact of the first succeeded job in the step's test stage.
    /// A missing job or artifact falls back to the configured data.
    async fn ingest(
        &self,
        record: &PipelineExecution,
        handle: &PipelineHandle,
        token: &str,
        test_stage: &str,
        log: &ExecutionLog,
    ) -> HashMap<String, String> {
        let configured = record.configured_test_data.clone();

        let jobs = match self.client.list_jobs(handle, token).await {
            Ok(jobs) => jobs,
            Err(err) => {
                log.warn(format!(
                    "Could not list jobs of pipeline {} ({}): {}",
                    handle.pipeline_id,
                    err.kind(),
                    err
                ));
                return configured;
            }
        };

        let Some(job) = jobs
            .iter()
            .find(|job| job.stage == test_stage && job.succeeded)
        else {
            log.warn(format!(
                "No succeeded job in stage '{}' for pipeline {}",
                test_stage, handle.pipeline_id
            ));
            return configured;
        };

        match self
            .client
            .fetch_artifact(&handle.project, job.id, OUTPUT_ENV_PATH, token)
            .await
        {
            Ok(text) => {
                let output = ArtifactParser::parse(&text);
                log.info(format!(
                    "Loaded {} output variables from job {}",
                    output.len(),
                    job.id
                ));
                VariableStore::overlay(&configured, &output)
            }
            Err(err) => {
                log.warn(format!(
                    "No {} artifact on job {} ({}): {}",
                    OUTPUT_ENV_PATH,
                    job.id,
                    err.kind(),
                    err
                ));
                configured
            }
        }
    }
}
