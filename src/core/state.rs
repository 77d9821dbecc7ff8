//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::model::{FlowId, StepId};

/// Status shared by flow executions and per-step pipeline records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Created but not yet started
    Pending,
    /// Currently running
    Running,
    /// Completed successfully
    Passed,
    /// Failed
    Failed,
    /// Cancelled
    Cancelled,
    /// Waiting for a delay to elapse, or not started yet
    Scheduled,
}

impl ExecutionStatus {
    /// PASSED, FAILED and CANCELLED are final
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Passed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Passed => "PASSED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
            ExecutionStatus::Scheduled => "SCHEDULED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ExecutionStatus::Pending),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "PASSED" => Ok(ExecutionStatus::Passed),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "CANCELLED" => Ok(ExecutionStatus::Cancelled),
            "SCHEDULED" => Ok(ExecutionStatus::Scheduled),
            other => Err(format!("unknown execution status '{}'", other)),
        }
    }
}

/// One concrete run (or replay) of a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowExecution {
    pub id: Uuid,
    pub flow_id: FlowId,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,

    /// Variables accumulated from completed steps
    pub runtime_variables: HashMap<String, String>,

    pub is_replay: bool,
    pub original_execution_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl FlowExecution {
    /// Create a fresh RUNNING execution for a flow
    pub fn new(flow_id: FlowId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            flow_id,
            status: ExecutionStatus::Running,
            start_time: now,
            end_time: None,
            runtime_variables: HashMap::new(),
            is_replay: false,
            original_execution_id: None,
            created_at: now,
        }
    }

    /// Create a replay of `original`, seeded with the reconstructed accumulator
    pub fn replay(original: &FlowExecution, seed: HashMap<String, String>) -> Self {
        let mut execution = Self::new(original.flow_id);
        execution.runtime_variables = seed;
        execution.is_replay = true;
        execution.original_execution_id = Some(original.id);
        execution
    }

    /// Move to a terminal status. Returns false if already terminal.
    pub fn complete(&mut self, status: ExecutionStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.end_time = Some(Utc::now());
        true
    }
}

/// Per-step record of one pipeline run inside an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub id: Uuid,
    pub flow_id: FlowId,
    pub flow_execution_id: Uuid,
    pub flow_step_id: StepId,

    /// External pipeline id, set once the trigger succeeded
    pub pipeline_id: Option<u64>,
    pub pipeline_url: Option<String>,

    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,

    /// Step input: merged test data plus accumulated runtime values
    pub configured_test_data: HashMap<String, String>,

    /// Step output: configured data overlaid with the parsed artifact
    pub runtime_test_data: HashMap<String, String>,

    pub status: ExecutionStatus,
    pub is_replay: bool,

    /// Copied from a previous run rather than executed
    pub carried: bool,

    pub original_execution_id: Option<Uuid>,

    /// When a delayed step may start
    pub resume_time: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl PipelineExecution {
    /// Create a RUNNING record for a step that is about to be triggered
    pub fn start(
        execution: &FlowExecution,
        step_id: StepId,
        configured_test_data: HashMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            flow_id: execution.flow_id,
            flow_execution_id: execution.id,
            flow_step_id: step_id,
            pipeline_id: None,
            pipeline_url: None,
            start_time: now,
            end_time: None,
            configured_test_data,
            runtime_test_data: HashMap::new(),
            status: ExecutionStatus::Running,
            is_replay: execution.is_replay,
            carried: false,
            original_execution_id: execution.original_execution_id,
            resume_time: None,
            created_at: now,
        }
    }

    /// Copy a record of a previous run into a replay without re-running it
    pub fn carried_from(original: &PipelineExecution, replay: &FlowExecution) -> Self {
        Self {
            id: Uuid::new_v4(),
            flow_execution_id: replay.id,
            is_replay: true,
            carried: true,
            original_execution_id: Some(original.flow_execution_id),
            created_at: Utc::now(),
            ..original.clone()
        }
    }

    pub fn pass(&mut self, runtime_test_data: HashMap<String, String>) {
        self.runtime_test_data = runtime_test_data;
        self.finish(ExecutionStatus::Passed);
    }

    pub fn fail(&mut self) {
        self.finish(ExecutionStatus::Failed);
    }

    fn finish(&mut self, status: ExecutionStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.end_time = Some(Utc::now());
    }
}

/// Progress of one flow step within an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepProgress {
    pub step_id: StepId,
    pub index: usize,
    pub status: ExecutionStatus,

    /// The latest record for the step, absent for steps not started yet
    pub record: Option<PipelineExecution>,
}

/// An execution together with the progress of every step in its flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDetails {
    pub execution: FlowExecution,
    pub steps: Vec<StepProgress>,
}

impl ExecutionDetails {
    /// Number of steps in a terminal state
    pub fn finished_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.status.is_terminal()).count()
    }

    /// Fraction of finished steps (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        self.finished_steps() as f64 / self.steps.len() as f64
    }
}
