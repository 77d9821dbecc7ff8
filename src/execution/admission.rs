//! Admission control for single, batch and replay submissions

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ci::PipelineClient;
use crate::core::{ExecutionStatus, FlowExecution, FlowId, OrchestratorError, StepId};
use crate::execution::pool::{PoolStatus, WorkerPool};
use crate::execution::{FlowExecutionCoordinator, ReplayCoordinator};

const CAPACITY_MESSAGE: &str = "Thread pool at capacity, flow execution rejected";

/// Why a flow id in a batch was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    FlowNotFound,
    ThreadPoolCapacity,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::FlowNotFound => "flow_not_found",
            RejectionReason::ThreadPoolCapacity => "thread_pool_capacity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub flow_id: FlowId,
    pub reason: RejectionReason,
    pub message: String,
}

/// Awaitable handle of a dispatched execution; dropping it detaches
#[derive(Debug)]
pub struct ExecutionHandle {
    execution_id: Uuid,
    task: JoinHandle<Result<FlowExecution, OrchestratorError>>,
}

impl ExecutionHandle {
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Wait for the execution to reach a terminal state
    pub async fn wait(self) -> Result<FlowExecution, OrchestratorError> {
        self.task
            .await
            .map_err(|e| OrchestratorError::Internal(format!("execution task aborted: {}", e)))?
    }
}

/// A created and dispatched execution
#[derive(Debug)]
pub struct Accepted {
    pub execution: FlowExecution,
    pub handle: ExecutionHandle,
}

/// Result of a batch submission
#[derive(Debug)]
pub struct BatchOutcome {
    pub accepted: Vec<Accepted>,
    pub rejected: Vec<Rejection>,

    /// Number of distinct ids requested
    pub total_requested: usize,

    /// Pool snapshot the decision was based on
    pub pool: PoolStatus,
}

impl BatchOutcome {
    pub fn all_accepted(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Whether any id was refused for lack of capacity
    pub fn capacity_exceeded(&self) -> bool {
        self.rejected
            .iter()
            .any(|r| r.reason == RejectionReason::ThreadPoolCapacity)
    }

    pub fn accepted_ids(&self) -> Vec<FlowId> {
        self.accepted.iter().map(|a| a.execution.flow_id).collect()
    }
}

/// Parse a comma separated list of flow ids.
///
/// Fails on empty input, non-numeric tokens and non-positive ids.
/// Duplicates are dropped, keeping the first occurrence.
pub fn parse_flow_ids(input: &str) -> Result<Vec<FlowId>, OrchestratorError> {
    if input.trim().is_empty() {
        return Err(OrchestratorError::InvalidState(
            "flow id list must not be empty".to_string(),
        ));
    }

    let mut ids = Vec::new();
    for token in input.split(',') {
        let token = token.trim();
        let id: i64 = token.parse().map_err(|_| {
            OrchestratorError::InvalidState(format!("invalid flow id '{}'", token))
        })?;
        if id <= 0 {
            return Err(OrchestratorError::InvalidState(format!(
                "flow id must be positive, got {}",
                id
            )));
        }
        ids.push(id as FlowId);
    }

    let parsed = ids.len();
    let ids = dedupe(ids);
    if ids.len() < parsed {
        info!("Removed {} duplicate flow ids", parsed - ids.len());
    }
    Ok(ids)
}

fn dedupe(ids: Vec<FlowId>) -> Vec<FlowId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// Accepts executions against worker pool headroom
pub struct AdmissionController<C> {
    coordinator: FlowExecutionCoordinator<C>,
    replay: ReplayCoordinator<C>,
    pool: WorkerPool,
}

impl<C: PipelineClient + 'static> AdmissionController<C> {
    pub fn new(coordinator: FlowExecutionCoordinator<C>, pool: WorkerPool) -> Self {
        let replay = ReplayCoordinator::new(coordinator.clone());
        Self {
            coordinator,
            replay,
            pool,
        }
    }

    pub fn coordinator(&self) -> &FlowExecutionCoordinator<C> {
        &self.coordinator
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Create and dispatch one execution
    pub async fn submit_flow(&self, flow_id: FlowId) -> Result<Accepted, OrchestratorError> {
        let execution = self.coordinator.create_execution(flow_id).await?;
        self.dispatch(execution).await
    }

    /// Create and dispatch a replay of a failed execution
    pub async fn submit_replay(
        &self,
        execution_id: Uuid,
        failed_step_id: StepId,
    ) -> Result<Accepted, OrchestratorError> {
        let replay = self.create_replay(execution_id, failed_step_id).await?;
        self.dispatch_replay(replay, failed_step_id).await
    }

    /// Create a replay without starting it
    pub async fn create_replay(
        &self,
        execution_id: Uuid,
        failed_step_id: StepId,
    ) -> Result<FlowExecution, OrchestratorError> {
        self.replay.create_replay(execution_id, failed_step_id).await
    }

    /// Dispatch a replay created by [`create_replay`](Self::create_replay)
    pub async fn dispatch_replay(
        &self,
        replay_execution: FlowExecution,
        failed_step_id: StepId,
    ) -> Result<Accepted, OrchestratorError> {
        let original_id = replay_execution.original_execution_id.ok_or_else(|| {
            OrchestratorError::InvalidArgument(format!(
                "execution {} is not a replay",
                replay_execution.id
            ))
        })?;

        let replay = self.replay.clone();
        let replay_id = replay_execution.id;
        let task = self.pool.submit(async move {
            replay
                .run_replay(replay_id, original_id, failed_step_id)
                .await
        });
        self.accept(replay_execution, task.ok()).await
    }

    /// Accept as many of `flow_ids` as the pool can take right now.
    ///
    /// Capacity is measured once; the measurement and the loop are not
    /// atomic with other submissions, but the pool itself never takes more
    /// than it can hold.
    pub async fn submit_batch(&self, flow_ids: &[FlowId]) -> Result<BatchOutcome, OrchestratorError> {
        let ids = dedupe(flow_ids.to_vec());
        let pool = self.pool.status();
        let capacity = pool.available_capacity;

        info!(
            "Batch submission of {} flows, available capacity {}",
            ids.len(),
            capacity
        );

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for flow_id in &ids {
            if accepted.len() >= capacity {
                rejected.push(capacity_rejection(*flow_id));
                continue;
            }

            match self.coordinator.create_execution(*flow_id).await {
                Ok(execution) => match self.dispatch(execution).await {
                    Ok(a) => accepted.push(a),
                    Err(OrchestratorError::CapacityExceeded(_)) => {
                        rejected.push(capacity_rejection(*flow_id))
                    }
                    Err(err) => return Err(err),
                },
                Err(OrchestratorError::NotFound(_)) => rejected.push(Rejection {
                    flow_id: *flow_id,
                    reason: RejectionReason::FlowNotFound,
                    message: format!("Flow not found: {}", flow_id),
                }),
                Err(err) => return Err(err),
            }
        }

        if !rejected.is_empty() {
            warn!(
                "Batch submission: {} accepted, {} rejected",
                accepted.len(),
                rejected.len()
            );
        }

        Ok(BatchOutcome {
            accepted,
            rejected,
            total_requested: ids.len(),
            pool,
        })
    }

    /// Dispatch an already created execution to the pool
    pub async fn dispatch(&self, execution: FlowExecution) -> Result<Accepted, OrchestratorError> {
        let coordinator = self.coordinator.clone();
        let execution_id = execution.id;
        let task = self
            .pool
            .submit(async move { coordinator.run(execution_id).await });
        self.accept(execution, task.ok()).await
    }

    /// Wrap a dispatched task, or fail the just-created execution when the
    /// pool refused it
    async fn accept(
        &self,
        mut execution: FlowExecution,
        task: Option<JoinHandle<Result<FlowExecution, OrchestratorError>>>,
    ) -> Result<Accepted, OrchestratorError> {
        match task {
            Some(task) => Ok(Accepted {
                handle: ExecutionHandle {
                    execution_id: execution.id,
                    task,
                },
                execution,
            }),
            None => {
                warn!(execution_id = %execution.id, "{}", CAPACITY_MESSAGE);
                execution.complete(ExecutionStatus::Failed);
                self.coordinator
                    .repository()
                    .save_flow_execution(&execution)
                    .await?;
                Err(OrchestratorError::CapacityExceeded(CAPACITY_MESSAGE.to_string()))
            }
        }
    }
}

fn capacity_rejection(flow_id: FlowId) -> Rejection {
    Rejection {
        flow_id,
        reason: RejectionReason::ThreadPoolCapacity,
        message: CAPACITY_MESSAGE.to_string(),
    }
}
