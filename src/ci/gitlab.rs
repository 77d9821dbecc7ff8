//! GitLab REST client

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::{CiClientConfig, CiError, PipelineClient, PipelineHandle, PipelineJob, PipelineStatus};

const TOKEN_HEADER: &str = "PRIVATE-TOKEN";

/// Pipeline client backed by the GitLab v4 API
#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: Client,
    config: CiClientConfig,
}

#[derive(Debug, Serialize)]
struct TriggerRequest<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    variables: Vec<TriggerVariable<'a>>,
}

#[derive(Debug, Serialize)]
struct TriggerVariable<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
struct PipelineResponse {
    id: u64,
    status: String,
    #[serde(default)]
    web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    id: u64,
    stage: String,
    status: String,
    #[serde(default)]
    web_url: Option<String>,
}

impl GitLabClient {
    pub fn new(config: CiClientConfig) -> Result<Self, CiError> {
        let http = Client::builder()
            .user_agent(concat!("orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    fn project_url(&self, project: &str) -> String {
        format!(
            "{}/api/v4/projects/{}",
            self.config.base_url,
            encode_project(project)
        )
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, CiError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!("GitLab API error while {}: {} {}", what, status, body.trim());
        Err(CiError::from_status(
            status.as_u16(),
            format!("GitLab API error while {}: {}", what, status),
        ))
    }
}

/// Project paths such as `group/name` are passed URL-encoded
fn encode_project(project: &str) -> String {
    project.replace('/', "%2F")
}

#[async_trait]
impl PipelineClient for GitLabClient {
    async fn trigger(
        &self,
        project: &str,
        branch: &str,
        token: &str,
        variables: &HashMap<String, String>,
    ) -> Result<PipelineHandle, CiError> {
        info!("Triggering GitLab pipeline for project {} on branch {}", project, branch);

        let mut vars: Vec<TriggerVariable<'_>> = variables
            .iter()
            .map(|(key, value)| TriggerVariable { key, value })
            .collect();
        vars.sort_by(|a, b| a.key.cmp(b.key));

        let body = TriggerRequest {
            git_ref: branch,
            variables: vars,
        };

        let request = self
            .http
            .post(format!("{}/pipeline", self.project_url(project)))
            .header(TOKEN_HEADER, token)
            .timeout(self.config.request_timeout())
            .json(&body);

        let pipeline: PipelineResponse = self.send(request, "triggering pipeline").await?.json().await?;
        info!("Pipeline triggered successfully: {}", pipeline.id);

        Ok(PipelineHandle {
            project: project.to_string(),
            pipeline_id: pipeline.id,
            web_url: pipeline.web_url.unwrap_or_default(),
        })
    }

    async fn poll(&self, handle: &PipelineHandle, token: &str) -> Result<PipelineStatus, CiError> {
        let request = self
            .http
            .get(format!(
                "{}/pipelines/{}",
                self.project_url(&handle.project),
                handle.pipeline_id
            ))
            .header(TOKEN_HEADER, token)
            .timeout(self.config.poll_timeout());

        let pipeline: PipelineResponse = self.send(request, "reading pipeline status").await?.json().await?;
        debug!("Pipeline {} status: {}", pipeline.id, pipeline.status);
        Ok(PipelineStatus::from_gitlab(&pipeline.status))
    }

    async fn list_jobs(&self, handle: &PipelineHandle, token: &str) -> Result<Vec<PipelineJob>, CiError> {
        debug!("Getting jobs for pipeline {}", handle.pipeline_id);
        let request = self
            .http
            .get(format!(
                "{}/pipelines/{}/jobs",
                self.project_url(&handle.project),
                handle.pipeline_id
            ))
            .header(TOKEN_HEADER, token)
            .timeout(self.config.request_timeout());

        let jobs: Vec<JobResponse> = self.send(request, "listing pipeline jobs").await?.json().await?;
        Ok(jobs
            .into_iter()
            .map(|job| PipelineJob {
                id: job.id,
                stage: job.stage,
                succeeded: job.status == "success",
                web_url: job.web_url,
            })
            .collect())
    }

    async fn fetch_artifact(
        &self,
        project: &str,
        job_id: u64,
        path: &str,
        token: &str,
    ) -> Result<String, CiError> {
        info!("Downloading artifact {} from job {}", path, job_id);
        let request = self
            .http
            .get(format!(
                "{}/jobs/{}/artifacts/{}",
                self.project_url(project),
                job_id,
                path
            ))
            .header(TOKEN_HEADER, token)
            .timeout(self.config.download_timeout());

        let content = self.send(request, "downloading artifact").await?.text().await?;
        Ok(content)
    }
}
