//! Flow definition models
//!
//! These are the read-only definitions the orchestrator executes: flows,
//! their ordered steps, the applications those steps target and the test
//! data sets that feed them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type FlowId = u64;
pub type StepId = u64;
pub type ApplicationId = u64;
pub type TestDataId = u64;

/// An ordered sequence of steps executed as one logical test run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: FlowId,

    /// Optional display name
    #[serde(default)]
    pub name: Option<String>,

    /// Step references, in execution order
    pub steps: Vec<StepId>,
}

impl FlowDefinition {
    /// Position of a step within the flow's ordered step list
    pub fn position_of(&self, step_id: StepId) -> Option<usize> {
        self.steps.iter().position(|id| *id == step_id)
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("flow-{}", self.id))
    }
}

/// One unit of work bound to an application, branch and test stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStepDefinition {
    pub id: StepId,

    /// Application whose CI project is triggered
    pub application: ApplicationId,

    /// Branch the pipeline runs on
    pub branch: String,

    /// Static label passed to the pipeline
    pub test_tag: String,

    /// CI stage whose job publishes the step's output artifact
    pub test_stage: String,

    /// Test data sets merged (in order) into the step input
    #[serde(default)]
    pub test_data: Vec<TestDataId>,

    /// Optional wait before the step is triggered
    #[serde(default)]
    pub delay: Option<InvokeTimer>,
}

/// External CI project reference plus the handle of its credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,

    #[serde(default)]
    pub name: Option<String>,

    /// CI project id or path
    pub project: String,

    /// Environment variable holding the decrypted access token
    #[serde(default)]
    pub token_env: Option<String>,
}

/// Named bag of string key/value pairs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDataSet {
    pub id: TestDataId,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub variables: HashMap<String, String>,
}

/// Delay applied before a step is triggered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeTimer {
    #[serde(default)]
    pub days: Option<u32>,
    #[serde(default)]
    pub hours: Option<u32>,
    #[serde(default)]
    pub minutes: Option<u32>,
}

impl InvokeTimer {
    /// Total delay described by the timer
    pub fn duration(&self) -> Duration {
        Duration::days(i64::from(self.days.unwrap_or(0)))
            + Duration::hours(i64::from(self.hours.unwrap_or(0)))
            + Duration::minutes(i64::from(self.minutes.unwrap_or(0)))
    }

    pub fn is_empty(&self) -> bool {
        self.duration().is_zero()
    }

    /// When a step delayed by this timer may start; `None` if that lies
    /// beyond the representable date range
    pub fn resume_time(&self, previous_end: DateTime<Utc>) -> Option<DateTime<Utc>> {
        previous_end.checked_add_signed(self.duration())
    }
}
