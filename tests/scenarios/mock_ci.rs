//! Scripted CI client for deterministic scenario tests

use async_trait::async_trait;
use orchestrator::ci::{
    CiError, CiErrorKind, PipelineClient, PipelineHandle, PipelineJob, PipelineStatus,
    TEST_STAGE_VARIABLE,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// What the next triggered pipeline does
#[derive(Debug, Clone)]
pub enum Script {
    /// Succeeds and publishes `artifact` from its test stage job
    Pass(&'static str),
    /// Succeeds without any job in the test stage
    PassWithoutJobs,
    /// Finishes with status "failed"
    Fail,
    /// The trigger request itself is refused
    TriggerError,
    /// The client panics while triggering
    Panic,
}

/// One recorded trigger request
#[derive(Debug, Clone)]
pub struct TriggerCall {
    pub project: String,
    pub branch: String,
    pub variables: HashMap<String, String>,
}

#[derive(Debug)]
struct ScriptedPipeline {
    script: Script,
    stage: String,
}

pub struct ScriptedClient {
    scripts: Mutex<VecDeque<Script>>,
    pipelines: Mutex<HashMap<u64, ScriptedPipeline>>,
    triggers: Mutex<Vec<TriggerCall>>,
    next_id: AtomicU64,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedClient {
    /// Pipelines follow `scripts` in trigger order, then pass with no output
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            pipelines: Mutex::new(HashMap::new()),
            triggers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1000),
            gate: None,
        }
    }

    /// Every trigger waits for a permit on the returned gate
    pub fn gated(scripts: Vec<Script>) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let mut client = Self::new(scripts);
        client.gate = Some(gate.clone());
        (client, gate)
    }

    pub fn triggers(&self) -> Vec<TriggerCall> {
        self.triggers.lock().unwrap().clone()
    }

    fn script_of(&self, pipeline_id: u64) -> Result<(Script, String), CiError> {
        self.pipelines
            .lock()
            .unwrap()
            .get(&pipeline_id)
            .map(|p| (p.script.clone(), p.stage.clone()))
            .ok_or_else(|| CiError::new(CiErrorKind::NotFound, format!("pipeline {}", pipeline_id)))
    }
}

#[async_trait]
impl PipelineClient for ScriptedClient {
    async fn trigger(
        &self,
        project: &str,
        branch: &str,
        _token: &str,
        variables: &HashMap<String, String>,
    ) -> Result<PipelineHandle, CiError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        self.triggers.lock().unwrap().push(TriggerCall {
            project: project.to_string(),
            branch: branch.to_string(),
            variables: variables.clone(),
        });

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Pass(""));
        match script {
            Script::TriggerError => {
                return Err(CiError::new(CiErrorKind::Forbidden, "trigger refused"))
            }
            Script::Panic => panic!("scripted client crashed"),
            _ => {}
        }

        let pipeline_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stage = variables
            .get(TEST_STAGE_VARIABLE)
            .cloned()
            .unwrap_or_default();
        self.pipelines
            .lock()
            .unwrap()
            .insert(pipeline_id, ScriptedPipeline { script, stage });

        Ok(PipelineHandle {
            project: project.to_string(),
            pipeline_id,
            web_url: format!("https://ci.test/{}/-/pipelines/{}", project, pipeline_id),
        })
    }

    async fn poll(&self, handle: &PipelineHandle, _token: &str) -> Result<PipelineStatus, CiError> {
        let (script, _) = self.script_of(handle.pipeline_id)?;
        let status = match script {
            Script::Fail => "failed",
            _ => "success",
        };
        Ok(PipelineStatus::from_gitlab(status))
    }

    async fn list_jobs(&self, handle: &PipelineHandle, _token: &str) -> Result<Vec<PipelineJob>, CiError> {
        let (script, stage) = self.script_of(handle.pipeline_id)?;
        match script {
            Script::PassWithoutJobs => Ok(Vec::new()),
            _ => Ok(vec![PipelineJob {
                id: handle.pipeline_id,
                stage,
                succeeded: !matches!(script, Script::Fail),
                web_url: None,
            }]),
        }
    }

    async fn fetch_artifact(
        &self,
        _project: &str,
        job_id: u64,
        _path: &str,
        _token: &str,
    ) -> Result<String, CiError> {
        match self.script_of(job_id)? {
            (Script::Pass(artifact), _) => Ok(artifact.to_string()),
            _ => Err(CiError::new(CiErrorKind::NotFound, "no artifact")),
        }
    }
}
