//! Persistence layer for flow and pipeline execution records

pub mod definitions;
#[cfg(feature = "sqlite")]
pub mod store;

pub use definitions::{DefinitionStore, InMemoryDefinitions};
#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

use crate::core::{ExecutionStatus, FlowExecution, FlowId, PipelineExecution};
use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for execution record storage backends
#[async_trait::async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Insert or update a flow execution
    async fn save_flow_execution(&self, execution: &FlowExecution) -> Result<()>;

    /// Load a flow execution by ID
    async fn find_flow_execution(&self, id: Uuid) -> Result<Option<FlowExecution>>;

    /// All executions of a flow, oldest first
    async fn flow_executions_for_flow(&self, flow_id: FlowId) -> Result<Vec<FlowExecution>>;

    /// All executions currently in `status`, oldest first
    async fn flow_executions_with_status(&self, status: ExecutionStatus) -> Result<Vec<FlowExecution>>;

    /// The most recently created executions, newest first
    async fn recent_flow_executions(&self, limit: usize) -> Result<Vec<FlowExecution>>;

    /// Insert or update a per-step record
    async fn save_pipeline_execution(&self, record: &PipelineExecution) -> Result<()>;

    /// Load a per-step record by ID
    async fn find_pipeline_execution(&self, id: Uuid) -> Result<Option<PipelineExecution>>;

    /// Per-step records of one flow execution, in creation order
    async fn pipeline_executions_for(&self, flow_execution_id: Uuid) -> Result<Vec<PipelineExecution>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryRepository {
    executions: RwLock<HashMap<Uuid, FlowExecution>>,
    by_flow: RwLock<HashMap<FlowId, Vec<Uuid>>>,
    records: RwLock<HashMap<Uuid, PipelineExecution>>,
    by_execution: RwLock<HashMap<Uuid, Vec<Uuid>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            by_flow: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
            by_execution: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn oldest_first(mut executions: Vec<FlowExecution>) -> Vec<FlowExecution> {
    executions.sort_by_key(|e| e.created_at);
    executions
}

#[async_trait::async_trait]
impl ExecutionRepository for InMemoryRepository {
    async fn save_flow_execution(&self, execution: &FlowExecution) -> Result<()> {
        let mut execs = self.executions.write().await;
        let is_new = execs.insert(execution.id, execution.clone()).is_none();

        if is_new {
            let mut by_flow = self.by_flow.write().await;
            by_flow
                .entry(execution.flow_id)
                .or_insert_with(Vec::new)
                .push(execution.id);
        }

        Ok(())
    }

    async fn find_flow_execution(&self, id: Uuid) -> Result<Option<FlowExecution>> {
        let execs = self.executions.read().await;
        Ok(execs.get(&id).cloned())
    }

    async fn flow_executions_for_flow(&self, flow_id: FlowId) -> Result<Vec<FlowExecution>> {
        let execs = self.executions.read().await;
        let by_flow = self.by_flow.read().await;

        let result = by_flow
            .get(&flow_id)
            .map(|ids| ids.iter().filter_map(|id| execs.get(id).cloned()).collect())
            .unwrap_or_default();
        Ok(oldest_first(result))
    }

    async fn flow_executions_with_status(&self, status: ExecutionStatus) -> Result<Vec<FlowExecution>> {
        let execs = self.executions.read().await;
        let result = execs
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect();
        Ok(oldest_first(result))
    }

    async fn recent_flow_executions(&self, limit: usize) -> Result<Vec<FlowExecution>> {
        let execs = self.executions.read().await;
        let mut result: Vec<_> = execs.values().cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn save_pipeline_execution(&self, record: &PipelineExecution) -> Result<()> {
        let mut records = self.records.write().await;
        let is_new = records.insert(record.id, record.clone()).is_none();

        if is_new {
            let mut by_execution = self.by_execution.write().await;
            by_execution
                .entry(record.flow_execution_id)
                .or_insert_with(Vec::new)
                .push(record.id);
        }

        Ok(())
    }

    async fn find_pipeline_execution(&self, id: Uuid) -> Result<Option<PipelineExecution>> {
        let records = self.records.read().await;
        Ok(records.get(&id).cloned())
    }

    async fn pipeline_executions_for(&self, flow_execution_id: Uuid) -> Result<Vec<PipelineExecution>> {
        let records = self.records.read().await;
        let by_execution = self.by_execution.read().await;

        // ids are appended at insert time, which is creation order
        Ok(by_execution
            .get(&flow_execution_id)
            .map(|ids| ids.iter().filter_map(|id| records.get(id).cloned()).collect())
            .unwrap_or_default())
    }
}
