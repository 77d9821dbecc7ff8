//! Step executor - runs one flow step as a CI pipeline

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::ci::{CredentialProvider, PipelineClient, TEST_STAGE_VARIABLE, TEST_TAG_VARIABLE};
use crate::core::config::Settings;
use crate::core::{
    Application, ExecutionStatus, FlowExecution, FlowStepDefinition, OrchestratorError,
    PipelineExecution,
};
use crate::execution::poller::{PipelinePoller, PollRequest};
use crate::logs::ExecutionLog;
use crate::persistence::ExecutionRepository;

/// Executes a single step
pub struct StepExecutor<C> {
    client: Arc<C>,
    repository: Arc<dyn ExecutionRepository>,
    credentials: Arc<dyn CredentialProvider>,
    poller: PipelinePoller<C>,
}

impl<C: PipelineClient + 'static> StepExecutor<C> {
    pub fn new(
        client: Arc<C>,
        repository: Arc<dyn ExecutionRepository>,
        credentials: Arc<dyn CredentialProvider>,
        settings: &Settings,
    ) -> Self {
        let poller = PipelinePoller::new(client.clone(), repository.clone(), settings);
        Self {
            client,
            repository,
            credentials,
            poller,
        }
    }

    /// Run one step to a terminal record.
    ///
    /// CI failures produce a FAILED record rather than an error; `Err` is
    /// reserved for a double trigger and for storage failures.
    pub async fn execute(
        &self,
        execution: &FlowExecution,
        step: &FlowStepDefinition,
        application: &Application,
        input: HashMap<String, String>,
        previous_end: Option<DateTime<Utc>>,
        log: &ExecutionLog,
    ) -> Result<PipelineExecution, OrchestratorError> {
        self.ensure_not_running(execution, step).await?;

        let mut record = PipelineExecution::start(execution, step.id, input);

        if let Some(delay) = step.delay.filter(|d| !d.is_empty()) {
            let resume_at = delay
                .resume_time(previous_end.unwrap_or_else(Utc::now))
                .ok_or_else(|| {
                    OrchestratorError::InvalidArgument(format!(
                        "delay of step {} is out of range",
                        step.id
                    ))
                })?;
            record.status = ExecutionStatus::Scheduled;
            record.resume_time = Some(resume_at);
            self.repository.save_pipeline_execution(&record).await?;
            log.info(format!("Step {} scheduled to start at {}", step.id, resume_at));

            let wait = (resume_at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            record.status = ExecutionStatus::Running;
            record.start_time = Utc::now();
        }

        self.repository.save_pipeline_execution(&record).await?;

        let token = match self.credentials.token(application) {
            Ok(token) => token,
            Err(err) => {
                log.error(format!(
                    "No credentials for application {} ({}): {}",
                    application.id,
                    err.kind(),
                    err
                ));
                return self.fail(record).await;
            }
        };

        let mut variables = record.configured_test_data.clone();
        variables.insert(TEST_TAG_VARIABLE.to_string(), step.test_tag.clone());
        variables.insert(TEST_STAGE_VARIABLE.to_string(), step.test_stage.clone());

        log.info(format!(
            "Triggering pipeline for step {} on {}@{}",
            step.id, application.project, step.branch
        ));

        let handle = match self
            .client
            .trigger(&application.project, &step.branch, &token, &variables)
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                log.error(format!(
                    "Failed to trigger pipeline for step {} ({}): {}",
                    step.id,
                    err.kind(),
                    err
                ));
                return self.fail(record).await;
            }
        };

        record.pipeline_id = Some(handle.pipeline_id);
        record.pipeline_url = Some(handle.web_url.clone());
        self.repository.save_pipeline_execution(&record).await?;
        log.info(format!(
            "Pipeline {} triggered for step {}: {}",
            handle.pipeline_id, step.id, handle.web_url
        ));

        // The poller owns the record from here on
        let snapshot = record.clone();
        let task = self.poller.spawn(PollRequest {
            record,
            handle,
            token,
            test_stage: step.test_stage.clone(),
            log: log.clone(),
        });

        match task.await {
            Ok(result) => result,
            Err(join_err) => {
                log.error(format!("Polling task for step {} aborted: {}", step.id, join_err));
                self.fail(snapshot).await
            }
        }
    }

    async fn ensure_not_running(
        &self,
        execution: &FlowExecution,
        step: &FlowStepDefinition,
    ) -> Result<(), OrchestratorError> {
        let records = self.repository.pipeline_executions_for(execution.id).await?;
        let running = records.iter().any(|r| {
            r.flow_step_id == step.id && r.status == ExecutionStatus::Running && !r.carried
        });
        if running {
            return Err(OrchestratorError::InvalidState(format!(
                "step {} of execution {} is already running",
                step.id, execution.id
            )));
        }
        Ok(())
    }

    async fn fail(&self, mut record: PipelineExecution) -> Result<PipelineExecution, OrchestratorError> {
        record.fail();
        self.repository.save_pipeline_execution(&record).await?;
        Ok(record)
    }
}
