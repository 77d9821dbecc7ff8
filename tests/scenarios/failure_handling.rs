//! Test: Failure Handling - a failed step stops the flow

use crate::helpers::*;
use crate::mock_ci::{Script, ScriptedClient};
use async_trait::async_trait;
use orchestrator::ci::{EnvCredentialProvider, StaticCredentialProvider};
use orchestrator::core::config::OrchestratorConfig;
use orchestrator::core::{
    ExecutionStatus, FlowExecution, FlowId, OrchestratorError, PipelineExecution,
};
use orchestrator::execution::WorkerPool;
use orchestrator::persistence::{ExecutionRepository, InMemoryRepository};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A failed pipeline fails the flow and later steps never start
#[tokio::test]
async fn test_failed_step_stops_flow() {
    let h = harness(vec![Script::Pass("token=abc"), Script::Fail]);

    let execution = h.run_flow(1).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.end_time.is_some());
    assert_eq!(h.client.triggers().len(), 2);

    let records = h.records(execution.id).await;
    assert_eq!(
        statuses(&records),
        vec![(100, ExecutionStatus::Passed), (200, ExecutionStatus::Failed)]
    );

    // Output gathered before the failure is kept
    assert_eq!(execution.runtime_variables["token"], "abc");

    let details = h.coordinator().details(execution.id).await.unwrap();
    assert_eq!(details.steps[2].status, ExecutionStatus::Scheduled);
    assert!(details.steps[2].record.is_none());
}

/// A refused trigger fails the step without a pipeline
#[tokio::test]
async fn test_trigger_error_fails_step() {
    let h = harness(vec![Script::TriggerError]);

    let execution = h.run_flow(1).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    let records = h.records(execution.id).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Failed);
    assert!(records[0].pipeline_id.is_none());
    assert!(records[0].end_time.is_some());
}

/// Missing credentials fail the step before anything is triggered
#[tokio::test]
async fn test_missing_token_fails_step() {
    let h = harness_full(
        ScriptedClient::new(vec![]),
        WorkerPool::new(1, 1),
        Arc::new(EnvCredentialProvider),
    );

    let execution = h.run_flow(2).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(h.client.triggers().is_empty());
    let records = h.records(execution.id).await;
    assert_eq!(records[0].status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_unknown_flow_is_not_found() {
    let h = harness(vec![]);

    let err = h.controller.submit_flow(99).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
    assert!(err.is_client_error());
    assert!(h.coordinator().recent(10).await.unwrap().is_empty());
}

/// A finished execution is never reopened by a later failure
#[tokio::test]
async fn test_terminal_status_is_final() {
    let h = harness(vec![]);

    let mut execution = h.run_flow(2).await;
    assert_eq!(execution.status, ExecutionStatus::Passed);
    let end_time = execution.end_time;

    assert!(!execution.complete(ExecutionStatus::Failed));
    assert_eq!(execution.status, ExecutionStatus::Passed);
    assert_eq!(execution.end_time, end_time);
}

/// A step whose delay cannot be scheduled aborts the run and fails the
/// execution
#[tokio::test]
async fn test_unschedulable_delay_fails_execution() {
    // Deserialized directly so the out-of-range delay gets past validation
    let config: OrchestratorConfig =
        serde_yaml::from_str(&FLOWS.replace("minutes: 1", "days: 4000000000")).unwrap();
    let h = harness_from(
        config,
        ScriptedClient::new(vec![]),
        WorkerPool::new(1, 1),
        Arc::new(StaticCredentialProvider::new("test-token")),
        Arc::new(InMemoryRepository::new()),
    );

    let execution = h.coordinator().create_execution(4).await.unwrap();
    let mut subscription = h.hub().subscribe(execution.id);
    let accepted = h.controller.dispatch(execution.clone()).await.unwrap();

    let err = accepted.handle.wait().await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidArgument(_)));

    let stored = h.coordinator().details(execution.id).await.unwrap().execution;
    assert_eq!(stored.status, ExecutionStatus::Failed);
    assert!(stored.end_time.is_some());

    let records = h.records(execution.id).await;
    assert_eq!(statuses(&records), vec![(100, ExecutionStatus::Passed)]);
    assert_eq!(h.client.triggers().len(), 1);

    let lines = drain(&mut subscription);
    assert!(lines
        .iter()
        .any(|l| l.contains("Flow execution failed") && l.contains("out of range")));
    assert!(lines
        .last()
        .unwrap()
        .contains("Flow execution logging context closed"));
}

/// A crash inside the execution task still leaves nothing RUNNING
#[tokio::test]
async fn test_crashed_execution_task_fails_execution() {
    let h = harness(vec![Script::Panic]);

    let execution = h.coordinator().create_execution(2).await.unwrap();
    let mut subscription = h.hub().subscribe(execution.id);
    let accepted = h.controller.dispatch(execution.clone()).await.unwrap();

    let err = accepted.handle.wait().await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Internal(_)));

    let stored = h.coordinator().details(execution.id).await.unwrap().execution;
    assert_eq!(stored.status, ExecutionStatus::Failed);
    assert!(stored.end_time.is_some());

    let records = h.records(execution.id).await;
    assert_eq!(statuses(&records), vec![(100, ExecutionStatus::Failed)]);
    assert!(records[0].end_time.is_some());

    let lines = drain(&mut subscription);
    assert!(lines.iter().any(|l| l.contains("execution task aborted")));
    assert!(lines
        .last()
        .unwrap()
        .contains("Flow execution logging context closed"));
}

/// Refuses the first save of a finished step record
struct LosesFinishedStep {
    inner: InMemoryRepository,
    refused: AtomicBool,
}

#[async_trait]
impl ExecutionRepository for LosesFinishedStep {
    async fn save_flow_execution(&self, execution: &FlowExecution) -> anyhow::Result<()> {
        self.inner.save_flow_execution(execution).await
    }

    async fn find_flow_execution(&self, id: Uuid) -> anyhow::Result<Option<FlowExecution>> {
        self.inner.find_flow_execution(id).await
    }

    async fn flow_executions_for_flow(&self, flow_id: FlowId) -> anyhow::Result<Vec<FlowExecution>> {
        self.inner.flow_executions_for_flow(flow_id).await
    }

    async fn flow_executions_with_status(
        &self,
        status: ExecutionStatus,
    ) -> anyhow::Result<Vec<FlowExecution>> {
        self.inner.flow_executions_with_status(status).await
    }

    async fn recent_flow_executions(&self, limit: usize) -> anyhow::Result<Vec<FlowExecution>> {
        self.inner.recent_flow_executions(limit).await
    }

    async fn save_pipeline_execution(&self, record: &PipelineExecution) -> anyhow::Result<()> {
        if record.status.is_terminal() && !self.refused.swap(true, Ordering::SeqCst) {
            anyhow::bail!("database is locked");
        }
        self.inner.save_pipeline_execution(record).await
    }

    async fn find_pipeline_execution(&self, id: Uuid) -> anyhow::Result<Option<PipelineExecution>> {
        self.inner.find_pipeline_execution(id).await
    }

    async fn pipeline_executions_for(
        &self,
        flow_execution_id: Uuid,
    ) -> anyhow::Result<Vec<PipelineExecution>> {
        self.inner.pipeline_executions_for(flow_execution_id).await
    }
}

/// When the finished step cannot be stored, the run still marks the step
/// and the execution FAILED
#[tokio::test]
async fn test_lost_step_result_fails_step() {
    let h = harness_from(
        OrchestratorConfig::from_yaml(FLOWS).unwrap(),
        ScriptedClient::new(vec![Script::Pass("token=abc")]),
        WorkerPool::new(1, 1),
        Arc::new(StaticCredentialProvider::new("test-token")),
        Arc::new(LosesFinishedStep {
            inner: InMemoryRepository::new(),
            refused: AtomicBool::new(false),
        }),
    );

    let accepted = h.controller.submit_flow(1).await.unwrap();
    let execution_id = accepted.execution.id;
    let err = accepted.handle.wait().await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Persistence(_)));

    let stored = h.coordinator().details(execution_id).await.unwrap().execution;
    assert_eq!(stored.status, ExecutionStatus::Failed);
    assert!(stored.end_time.is_some());

    let records = h.records(execution_id).await;
    assert_eq!(statuses(&records), vec![(100, ExecutionStatus::Failed)]);
    assert!(records[0].end_time.is_some());
    assert_eq!(h.client.triggers().len(), 1);
}
