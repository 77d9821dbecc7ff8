//! Orchestrator configuration from YAML

use crate::core::model::{Application, FlowDefinition, FlowStepDefinition, TestDataSet};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "orchestrator.yaml";

/// Top-level configuration: runtime settings plus flow definitions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub settings: Settings,

    #[serde(default)]
    pub applications: Vec<Application>,

    #[serde(default)]
    pub test_data: Vec<TestDataSet>,

    #[serde(default)]
    pub flow_steps: Vec<FlowStepDefinition>,

    #[serde(default)]
    pub flows: Vec<FlowDefinition>,
}

/// Runtime settings for the CI client, poller and worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the GitLab instance
    pub gitlab_url: String,

    /// Use the built-in mock CI client instead of GitLab
    pub mock_mode: bool,

    /// Seconds between pipeline status checks
    pub poll_interval_secs: u64,

    /// Maximum status checks per pipeline (unbounded when unset)
    pub max_poll_attempts: Option<u32>,

    /// Timeout for a single CI request
    pub request_timeout_secs: u64,

    /// Number of flow executions running concurrently
    pub max_workers: usize,

    /// Number of flow executions allowed to wait for a worker
    pub queue_capacity: usize,

    /// SQLite database path for execution history
    pub database: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gitlab_url: "https://gitlab.com".to_string(),
            mock_mode: false,
            poll_interval_secs: 30,
            max_poll_attempts: None,
            request_timeout_secs: 30,
            max_workers: 20,
            queue_capacity: 100,
            database: None,
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl OrchestratorConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: OrchestratorConfig =
            serde_yaml::from_str(yaml).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate settings and cross references between definitions
    pub fn validate(&self) -> Result<()> {
        if self.settings.max_workers == 0 {
            anyhow::bail!("settings.max_workers must be at least 1");
        }
        if self.settings.max_poll_attempts == Some(0) {
            anyhow::bail!("settings.max_poll_attempts must be at least 1 when set");
        }

        let application_ids = unique_ids("application", self.applications.iter().map(|a| a.id))?;
        let test_data_ids = unique_ids("test data", self.test_data.iter().map(|t| t.id))?;
        let step_ids = unique_ids("flow step", self.flow_steps.iter().map(|s| s.id))?;
        unique_ids("flow", self.flows.iter().map(|f| f.id))?;

        for app in &self.applications {
            if app.project.trim().is_empty() {
                anyhow::bail!("Application {} has an empty project", app.id);
            }
        }

        for step in &self.flow_steps {
            if !application_ids.contains(&step.application) {
                anyhow::bail!(
                    "Flow step {} references non-existent application {}",
                    step.id,
                    step.application
                );
            }
            for data_id in &step.test_data {
                if !test_data_ids.contains(data_id) {
                    anyhow::bail!(
                        "Flow step {} references non-existent test data {}",
                        step.id,
                        data_id
                    );
                }
            }
            if step.branch.trim().is_empty() {
                anyhow::bail!("Flow step {} has an empty branch", step.id);
            }
            if let Some(delay) = &step.delay {
                if delay.is_empty() {
                    anyhow::bail!("Flow step {} has a delay without any duration", step.id);
                }
                if delay.resume_time(Utc::now()).is_none() {
                    anyhow::bail!("Flow step {} has a delay that is out of range", step.id);
                }
            }
        }

        for flow in &self.flows {
            if flow.steps.is_empty() {
                anyhow::bail!("Flow {} has no steps", flow.id);
            }
            let mut seen = HashSet::new();
            for step_id in &flow.steps {
                if !step_ids.contains(step_id) {
                    anyhow::bail!("Flow {} references non-existent step {}", flow.id, step_id);
                }
                if !seen.insert(*step_id) {
                    anyhow::bail!("Flow {} lists step {} more than once", flow.id, step_id);
                }
            }
        }

        Ok(())
    }
}

fn unique_ids(kind: &str, ids: impl Iterator<Item = u64>) -> Result<HashSet<u64>> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            anyhow::bail!("Duplicate {} ID: {}", kind, id);
        }
    }
    Ok(seen)
}
