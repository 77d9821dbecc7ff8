//! Replay of failed executions from the failed step onward

use std::collections::HashMap;
use uuid::Uuid;

use crate::ci::PipelineClient;
use crate::core::{
    ExecutionStatus, FlowDefinition, FlowExecution, OrchestratorError, PipelineExecution, StepId,
    VariableStore,
};
use crate::execution::FlowExecutionCoordinator;
use crate::logs::ExecutionLog;

/// Creates replay executions and resumes them through the coordinator
pub struct ReplayCoordinator<C> {
    coordinator: FlowExecutionCoordinator<C>,
}

impl<C> Clone for ReplayCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<C: PipelineClient + 'static> ReplayCoordinator<C> {
    pub fn new(coordinator: FlowExecutionCoordinator<C>) -> Self {
        Self { coordinator }
    }

    /// Create a replay of a FAILED execution that resumes at `failed_step_id`.
    ///
    /// Every precondition is checked before anything is written. The new
    /// execution is seeded with the variables of the original's PASSED steps
    /// before the failed one, and those steps are copied as carried records.
    pub async fn create_replay(
        &self,
        original_execution_id: Uuid,
        failed_step_id: StepId,
    ) -> Result<FlowExecution, OrchestratorError> {
        let original = self.coordinator.load(original_execution_id).await?;
        if original.status != ExecutionStatus::Failed {
            return Err(OrchestratorError::InvalidState(format!(
                "execution {} is {}, only FAILED executions can be replayed",
                original.id, original.status
            )));
        }

        let flow = self.coordinator.flow(original.flow_id)?;
        let failed_index = step_index(&flow, failed_step_id)?;

        let records = self
            .coordinator
            .repository()
            .pipeline_executions_for(original.id)
            .await?;
        let carried = carried_records(&flow, &records, failed_index);

        let mut seed = HashMap::new();
        for record in &carried {
            VariableStore::accumulate(&mut seed, &record.runtime_test_data);
        }

        let replay = FlowExecution::replay(&original, seed);
        let repository = self.coordinator.repository();
        repository.save_flow_execution(&replay).await?;
        for record in &carried {
            repository
                .save_pipeline_execution(&PipelineExecution::carried_from(record, &replay))
                .await?;
        }

        ExecutionLog::new(replay.id, self.coordinator.hub().clone()).info(format!(
            "Replay of execution {} created at step {} with {} carried steps",
            original.id,
            failed_step_id,
            carried.len()
        ));

        Ok(replay)
    }

    /// Resume a replay created by [`create_replay`](Self::create_replay)
    pub async fn run_replay(
        &self,
        replay_execution_id: Uuid,
        original_execution_id: Uuid,
        failed_step_id: StepId,
    ) -> Result<FlowExecution, OrchestratorError> {
        let replay = self.coordinator.load(replay_execution_id).await?;
        if !replay.is_replay || replay.original_execution_id != Some(original_execution_id) {
            return Err(OrchestratorError::InvalidArgument(format!(
                "execution {} is not a replay of {}",
                replay_execution_id, original_execution_id
            )));
        }

        let flow = self.coordinator.flow(replay.flow_id)?;
        let failed_index = step_index(&flow, failed_step_id)?;

        self.coordinator
            .run_from(replay_execution_id, failed_index)
            .await
    }
}

fn step_index(flow: &FlowDefinition, step_id: StepId) -> Result<usize, OrchestratorError> {
    flow.position_of(step_id).ok_or_else(|| {
        OrchestratorError::InvalidArgument(format!(
            "step {} is not part of flow {}",
            step_id, flow.id
        ))
    })
}

/// The latest PASSED record of every step strictly before `failed_index`,
/// in flow order
pub fn carried_records(
    flow: &FlowDefinition,
    records: &[PipelineExecution],
    failed_index: usize,
) -> Vec<PipelineExecution> {
    let mut latest: HashMap<StepId, &PipelineExecution> = HashMap::new();
    for record in records {
        if record.status == ExecutionStatus::Passed {
            latest.insert(record.flow_step_id, record);
        }
    }

    flow.steps
        .iter()
        .take(failed_index)
        .filter_map(|step_id| latest.get(step_id).map(|r| (*r).clone()))
        .collect()
}
