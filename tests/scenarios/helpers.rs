//! Shared fixtures for scenario tests

use crate::mock_ci::{Script, ScriptedClient};
use orchestrator::ci::{CredentialProvider, StaticCredentialProvider};
use orchestrator::core::config::OrchestratorConfig;
use orchestrator::core::{ExecutionStatus, FlowExecution, PipelineExecution};
use orchestrator::execution::{AdmissionController, FlowExecutionCoordinator, WorkerPool};
use orchestrator::logs::{LogBroadcastHub, LogSubscription};
use orchestrator::persistence::{ExecutionRepository, InMemoryDefinitions, InMemoryRepository};
use std::sync::Arc;
use uuid::Uuid;

/// Three steps across two projects:
///
/// - flow 1: 100 -> 200 -> 300
/// - flow 2: 100
/// - flow 3: 200
/// - flow 4: 100 -> 400, where 400 waits a minute
pub const FLOWS: &str = r#"
settings:
  poll_interval_secs: 0

applications:
  - id: 1
    name: "accounts"
    project: "qa/accounts"
    token_env: "ORCHESTRATOR_SCENARIO_TOKEN_UNSET"
  - id: 2
    name: "payments"
    project: "qa/payments"

test_data:
  - id: 10
    name: "buyer"
    variables:
      user: "bob"
  - id: 11
    name: "environment"
    variables:
      env: "qa"

flow_steps:
  - id: 100
    application: 1
    branch: "main"
    test_tag: "@signup"
    test_stage: "test"
    test_data: [11]
  - id: 200
    application: 2
    branch: "develop"
    test_tag: "@checkout"
    test_stage: "e2e"
    test_data: [10]
  - id: 300
    application: 1
    branch: "main"
    test_tag: "@cleanup"
    test_stage: "test"
  - id: 400
    application: 1
    branch: "main"
    test_tag: "@later"
    test_stage: "test"
    delay:
      minutes: 1

flows:
  - id: 1
    name: "signup, checkout, cleanup"
    steps: [100, 200, 300]
  - id: 2
    steps: [100]
  - id: 3
    steps: [200]
  - id: 4
    steps: [100, 400]
"#;

pub struct Harness {
    pub client: Arc<ScriptedClient>,
    pub repository: Arc<dyn ExecutionRepository>,
    pub controller: AdmissionController<ScriptedClient>,
}

impl Harness {
    pub fn coordinator(&self) -> &FlowExecutionCoordinator<ScriptedClient> {
        self.controller.coordinator()
    }

    pub fn hub(&self) -> &LogBroadcastHub {
        self.coordinator().hub()
    }

    pub async fn records(&self, execution_id: Uuid) -> Vec<PipelineExecution> {
        self.repository
            .pipeline_executions_for(execution_id)
            .await
            .unwrap()
    }

    /// Submit a flow and wait for it to finish
    pub async fn run_flow(&self, flow_id: u64) -> FlowExecution {
        let accepted = self.controller.submit_flow(flow_id).await.unwrap();
        accepted.handle.wait().await.unwrap()
    }
}

pub fn harness(scripts: Vec<Script>) -> Harness {
    harness_with(ScriptedClient::new(scripts), WorkerPool::new(4, 4))
}

pub fn harness_with(client: ScriptedClient, pool: WorkerPool) -> Harness {
    harness_full(
        client,
        pool,
        Arc::new(StaticCredentialProvider::new("test-token")),
    )
}

pub fn harness_full(
    client: ScriptedClient,
    pool: WorkerPool,
    credentials: Arc<dyn CredentialProvider>,
) -> Harness {
    harness_from(
        OrchestratorConfig::from_yaml(FLOWS).unwrap(),
        client,
        pool,
        credentials,
        Arc::new(InMemoryRepository::new()),
    )
}

pub fn harness_from(
    config: OrchestratorConfig,
    client: ScriptedClient,
    pool: WorkerPool,
    credentials: Arc<dyn CredentialProvider>,
    repository: Arc<dyn ExecutionRepository>,
) -> Harness {
    let client = Arc::new(client);

    let coordinator = FlowExecutionCoordinator::new(
        client.clone(),
        Arc::new(InMemoryDefinitions::from_config(&config)),
        repository.clone(),
        credentials,
        LogBroadcastHub::new(),
        &config.settings,
    );

    Harness {
        client,
        repository,
        controller: AdmissionController::new(coordinator, pool),
    }
}

pub fn statuses(records: &[PipelineExecution]) -> Vec<(u64, ExecutionStatus)> {
    records.iter().map(|r| (r.flow_step_id, r.status)).collect()
}

/// Lines already published to a subscription
pub fn drain(subscription: &mut LogSubscription) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(line) = subscription.try_recv() {
        lines.push(line);
    }
    lines
}
