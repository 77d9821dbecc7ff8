//! Flow execution coordinator - drives an execution through its steps

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info_span, Instrument};
use uuid::Uuid;

use crate::ci::{CredentialProvider, PipelineClient};
use crate::core::config::Settings;
use crate::core::{
    ExecutionDetails, ExecutionStatus, FlowDefinition, FlowExecution, FlowId, OrchestratorError,
    StepId, StepProgress, VariableStore,
};
use crate::execution::StepExecutor;
use crate::logs::{ExecutionLog, LogBroadcastHub};
use crate::persistence::{DefinitionStore, ExecutionRepository};

/// Drives flow executions step by step, accumulating runtime variables
pub struct FlowExecutionCoordinator<C> {
    definitions: Arc<dyn DefinitionStore>,
    repository: Arc<dyn ExecutionRepository>,
    executor: Arc<StepExecutor<C>>,
    hub: LogBroadcastHub,
}

impl<C> Clone for FlowExecutionCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            definitions: self.definitions.clone(),
            repository: self.repository.clone(),
            executor: self.executor.clone(),
            hub: self.hub.clone(),
        }
    }
}

impl<C: PipelineClient + 'static> FlowExecutionCoordinator<C> {
    pub fn new(
        client: Arc<C>,
        definitions: Arc<dyn DefinitionStore>,
        repository: Arc<dyn ExecutionRepository>,
        credentials: Arc<dyn CredentialProvider>,
        hub: LogBroadcastHub,
        settings: &Settings,
    ) -> Self {
        let executor = Arc::new(StepExecutor::new(
            client,
            repository.clone(),
            credentials,
            settings,
        ));
        Self {
            definitions,
            repository,
            executor,
            hub,
        }
    }

    pub fn definitions(&self) -> &Arc<dyn DefinitionStore> {
        &self.definitions
    }

    pub fn repository(&self) -> &Arc<dyn ExecutionRepository> {
        &self.repository
    }

    pub fn hub(&self) -> &LogBroadcastHub {
        &self.hub
    }

    pub(crate) fn flow(&self, flow_id: FlowId) -> Result<FlowDefinition, OrchestratorError> {
        self.definitions
            .flow(flow_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("flow {}", flow_id)))
    }

    pub(crate) async fn load(&self, execution_id: Uuid) -> Result<FlowExecution, OrchestratorError> {
        self.repository
            .find_flow_execution(execution_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("flow execution {}", execution_id)))
    }

    /// Create and persist a RUNNING execution for a flow
    pub async fn create_execution(&self, flow_id: FlowId) -> Result<FlowExecution, OrchestratorError> {
        self.flow(flow_id)?;

        let execution = FlowExecution::new(flow_id);
        self.repository.save_flow_execution(&execution).await?;
        tracing::info!(execution_id = %execution.id, "Created execution for flow {}", flow_id);
        Ok(execution)
    }

    /// Drive an execution from its first step to a terminal state
    pub async fn run(&self, execution_id: Uuid) -> Result<FlowExecution, OrchestratorError> {
        self.run_from(execution_id, 0).await
    }

    /// Drive an execution starting at `start_index` of its flow.
    ///
    /// The step loop runs on its own task; if that task dies the execution
    /// is still forced to FAILED.
    pub(crate) async fn run_from(
        &self,
        execution_id: Uuid,
        start_index: usize,
    ) -> Result<FlowExecution, OrchestratorError> {
        let coordinator = self.clone();
        let span = info_span!("flow_execution", execution_id = %execution_id);
        let task = tokio::spawn(
            async move { coordinator.run_logged(execution_id, start_index).await }.instrument(span),
        );

        match task.await {
            Ok(result) => result,
            Err(join_err) => {
                let log = ExecutionLog::new(execution_id, self.hub.clone());
                let err = OrchestratorError::Internal(format!("execution task aborted: {}", join_err));
                log.error(format!("Flow execution failed: {}", err));
                self.force_failed(execution_id).await;
                log.info("Flow execution logging context closed");
                Err(err)
            }
        }
    }

    async fn run_logged(
        &self,
        execution_id: Uuid,
        start_index: usize,
    ) -> Result<FlowExecution, OrchestratorError> {
        let log = ExecutionLog::new(execution_id, self.hub.clone());
        let mut execution = self.load(execution_id).await?;

        log.info(format!(
            "Flow execution started - flow {}, execution {}{}",
            execution.flow_id,
            execution.id,
            if execution.is_replay { " (replay)" } else { "" }
        ));

        let result = match self.drive_steps(&mut execution, start_index, &log).await {
            Ok(None) => {
                log.info("Flow execution completed successfully");
                Ok(execution)
            }
            Ok(Some(step_id)) => {
                log.error(format!("Flow execution failed: step {} failed", step_id));
                Ok(execution)
            }
            // Another run of this execution owns its state; leave it alone
            Err(err @ OrchestratorError::InvalidState(_)) => {
                log.error(format!("Flow execution rejected: {}", err));
                Err(err)
            }
            Err(err) => {
                log.error(format!("Flow execution failed: {}", err));
                self.fail_open_records(execution_id).await;
                execution.complete(ExecutionStatus::Failed);
                if let Err(save_err) = self.repository.save_flow_execution(&execution).await {
                    error!(%execution_id, "Could not persist failed execution: {:#}", save_err);
                }
                Err(err)
            }
        };

        log.info("Flow execution logging context closed");
        result
    }

    /// Run steps in flow order from `start_index`, stopping at the first
    /// failure. Returns the failed step, if any.
    async fn drive_steps(
        &self,
        execution: &mut FlowExecution,
        start_index: usize,
        log: &ExecutionLog,
    ) -> Result<Option<StepId>, OrchestratorError> {
        let flow = self.flow(execution.flow_id)?;
        let mut accumulator = execution.runtime_variables.clone();
        let mut previous_end = self.last_end_time(execution.id).await?;

        for (index, step_id) in flow.steps.iter().enumerate().skip(start_index) {
            let step = self
                .definitions
                .step(*step_id)
                .ok_or_else(|| OrchestratorError::NotFound(format!("flow step {}", step_id)))?;
            let application = self.definitions.application(step.application).ok_or_else(|| {
                OrchestratorError::NotFound(format!("application {}", step.application))
            })?;
            let configured = self.configured_test_data(&step.test_data)?;
            let input = VariableStore::overlay(&configured, &accumulator);

            log.info(format!(
                "Executing step {} ({}/{})",
                step.id,
                index + 1,
                flow.steps.len()
            ));

            let record = self
                .executor
                .execute(execution, &step, &application, input, previous_end, log)
                .await?;
            previous_end = record.end_time;

            if record.status != ExecutionStatus::Passed {
                execution.runtime_variables = accumulator;
                execution.complete(ExecutionStatus::Failed);
                self.repository.save_flow_execution(execution).await?;
                return Ok(Some(step.id));
            }

            VariableStore::accumulate(&mut accumulator, &record.runtime_test_data);
            execution.runtime_variables = accumulator.clone();
            self.repository.save_flow_execution(execution).await?;
            log.info(format!("Step {} passed", step.id));
        }

        execution.complete(ExecutionStatus::Passed);
        self.repository.save_flow_execution(execution).await?;
        Ok(None)
    }

    fn configured_test_data(
        &self,
        ids: &[crate::core::TestDataId],
    ) -> Result<HashMap<String, String>, OrchestratorError> {
        let sets = ids
            .iter()
            .map(|id| {
                self.definitions
                    .test_data(*id)
                    .ok_or_else(|| OrchestratorError::NotFound(format!("test data {}", id)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(VariableStore::merge(&sets))
    }

    async fn last_end_time(&self, execution_id: Uuid) -> Result<Option<DateTime<Utc>>, OrchestratorError> {
        let records = self.repository.pipeline_executions_for(execution_id).await?;
        Ok(records.iter().filter_map(|r| r.end_time).max())
    }

    /// Best effort: fail step records left RUNNING or SCHEDULED by an
    /// aborted run
    async fn fail_open_records(&self, execution_id: Uuid) {
        let records = match self.repository.pipeline_executions_for(execution_id).await {
            Ok(records) => records,
            Err(err) => {
                error!(%execution_id, "Could not load step records: {:#}", err);
                return;
            }
        };

        for mut record in records {
            if record.carried || record.status.is_terminal() {
                continue;
            }
            record.fail();
            if let Err(err) = self.repository.save_pipeline_execution(&record).await {
                error!(
                    %execution_id,
                    "Could not persist failed step {}: {:#}", record.flow_step_id, err
                );
            }
        }
    }

    async fn force_failed(&self, execution_id: Uuid) {
        self.fail_open_records(execution_id).await;
        match self.repository.find_flow_execution(execution_id).await {
            Ok(Some(mut execution)) => {
                if execution.complete(ExecutionStatus::Failed) {
                    if let Err(err) = self.repository.save_flow_execution(&execution).await {
                        error!(%execution_id, "Could not persist failed execution: {:#}", err);
                    }
                }
            }
            Ok(None) => {}
            Err(err) => error!(%execution_id, "Could not load execution: {:#}", err),
        }
    }

    /// The execution plus progress for every step of its flow.
    ///
    /// Steps without a record are reported as SCHEDULED.
    pub async fn details(&self, execution_id: Uuid) -> Result<ExecutionDetails, OrchestratorError> {
        let execution = self.load(execution_id).await?;
        let flow = self.flow(execution.flow_id)?;
        let records = self.repository.pipeline_executions_for(execution_id).await?;

        let steps = flow
            .steps
            .iter()
            .enumerate()
            .map(|(index, step_id)| {
                let latest = records
                    .iter()
                    .filter(|r| r.flow_step_id == *step_id)
                    .last()
                    .cloned();
                StepProgress {
                    step_id: *step_id,
                    index,
                    status: latest
                        .as_ref()
                        .map(|r| r.status)
                        .unwrap_or(ExecutionStatus::Scheduled),
                    record: latest,
                }
            })
            .collect();

        Ok(ExecutionDetails { execution, steps })
    }

    pub async fn executions_for_flow(&self, flow_id: FlowId) -> Result<Vec<FlowExecution>, OrchestratorError> {
        Ok(self.repository.flow_executions_for_flow(flow_id).await?)
    }

    pub async fn executions_with_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<FlowExecution>, OrchestratorError> {
        Ok(self.repository.flow_executions_with_status(status).await?)
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<FlowExecution>, OrchestratorError> {
        Ok(self.repository.recent_flow_executions(limit).await?)
    }
}
