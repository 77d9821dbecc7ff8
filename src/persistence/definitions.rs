//! Read-only lookup of flow definitions

use std::collections::HashMap;

use crate::core::config::OrchestratorConfig;
use crate::core::{
    Application, ApplicationId, FlowDefinition, FlowId, FlowStepDefinition, StepId, TestDataId,
    TestDataSet,
};

/// Lookup of flows, steps, applications and test data by id
pub trait DefinitionStore: Send + Sync {
    fn flow(&self, id: FlowId) -> Option<FlowDefinition>;
    fn step(&self, id: StepId) -> Option<FlowStepDefinition>;
    fn application(&self, id: ApplicationId) -> Option<Application>;
    fn test_data(&self, id: TestDataId) -> Option<TestDataSet>;

    /// All flows, ordered by id
    fn flows(&self) -> Vec<FlowDefinition>;
}

/// Definitions held in memory, usually built from the YAML config
#[derive(Debug, Clone, Default)]
pub struct InMemoryDefinitions {
    flows: HashMap<FlowId, FlowDefinition>,
    steps: HashMap<StepId, FlowStepDefinition>,
    applications: HashMap<ApplicationId, Application>,
    test_data: HashMap<TestDataId, TestDataSet>,
}

impl InMemoryDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let mut defs = Self::new();
        for app in &config.applications {
            defs.add_application(app.clone());
        }
        for set in &config.test_data {
            defs.add_test_data(set.clone());
        }
        for step in &config.flow_steps {
            defs.add_step(step.clone());
        }
        for flow in &config.flows {
            defs.add_flow(flow.clone());
        }
        defs
    }

    pub fn add_flow(&mut self, flow: FlowDefinition) {
        self.flows.insert(flow.id, flow);
    }

    pub fn add_step(&mut self, step: FlowStepDefinition) {
        self.steps.insert(step.id, step);
    }

    pub fn add_application(&mut self, application: Application) {
        self.applications.insert(application.id, application);
    }

    pub fn add_test_data(&mut self, set: TestDataSet) {
        self.test_data.insert(set.id, set);
    }
}

impl DefinitionStore for InMemoryDefinitions {
    fn flow(&self, id: FlowId) -> Option<FlowDefinition> {
        self.flows.get(&id).cloned()
    }

    fn step(&self, id: StepId) -> Option<FlowStepDefinition> {
        self.steps.get(&id).cloned()
    }

    fn application(&self, id: ApplicationId) -> Option<Application> {
        self.applications.get(&id).cloned()
    }

    fn test_data(&self, id: TestDataId) -> Option<TestDataSet> {
        self.test_data.get(&id).cloned()
    }

    fn flows(&self) -> Vec<FlowDefinition> {
        let mut flows: Vec<_> = self.flows.values().cloned().collect();
        flows.sort_by_key(|f| f.id);
        flows
    }
}
