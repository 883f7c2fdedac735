use std::time::Duration;

use afc_core::reconcile::ArtifactRecord;
use afc_core::{parse_agent_roster, AgentProfile, RunSummary};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("{0}")]
    Server(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Acknowledgement of `POST /run`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct StartedRun {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// The workflow service's REST surface.
#[async_trait]
pub trait WorkflowApi: Send + Sync {
    async fn list_runs(&self) -> Result<Vec<RunSummary>, ApiError>;
    async fn list_agents(&self) -> Result<Vec<AgentProfile>, ApiError>;
    async fn start_run(&self, product_idea: &str, hitl_enabled: bool) -> Result<StartedRun, ApiError>;
    async fn resume_run(&self, run_id: &str, hitl_enabled: bool) -> Result<(), ApiError>;
    async fn stop_run(&self, run_id: &str) -> Result<(), ApiError>;
    async fn fetch_artifact(&self, filename: &str, run_id: Option<&str>) -> Result<String, ApiError>;
    async fn list_run_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>, ApiError>;
}

#[derive(Serialize)]
struct StartRequest<'a> {
    product_idea: &'a str,
    hitl_enabled: bool,
}

#[derive(Serialize)]
struct ResumeRequest {
    hitl_enabled: bool,
}

#[derive(Deserialize)]
struct RunsEnvelope {
    #[serde(default)]
    runs: Vec<RunSummary>,
}

#[derive(Deserialize)]
struct ArtifactsEnvelope {
    #[serde(default)]
    artifacts: Vec<ArtifactRecord>,
}

/// `/artifact` reports a missing file as `{error}` with a 200 status.
#[derive(Deserialize)]
struct ArtifactEnvelope {
    #[serde(default)]
    content: String,
    #[serde(default)]
    error: Option<String>,
}

impl ArtifactEnvelope {
    fn into_content(self) -> Result<String, ApiError> {
        match self.error {
            Some(error) if !error.trim().is_empty() => Err(ApiError::Server(error)),
            _ => Ok(self.content),
        }
    }
}

pub struct HttpApi {
    base: Url,
    client: Client,
}

impl HttpApi {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { base, client })
    }

    /// Joins path segments onto the base url, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        endpoint(&self.base, segments)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        debug!("api_get: {url}");
        read_json(self.client.get(url).send().await?).await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, ApiError> {
        debug!("api_post: {url}");
        read_json(self.client.post(url).json(body).send().await?).await
    }
}

#[async_trait]
impl WorkflowApi for HttpApi {
    async fn list_runs(&self) -> Result<Vec<RunSummary>, ApiError> {
        let envelope: RunsEnvelope = self.get_json(self.endpoint(&["runs"])?).await?;
        Ok(envelope.runs)
    }

    async fn list_agents(&self) -> Result<Vec<AgentProfile>, ApiError> {
        let document: Value = self.get_json(self.endpoint(&["agents"])?).await?;
        if !document.is_object() {
            return Err(ApiError::Decode("agent roster is not an object".to_string()));
        }
        Ok(parse_agent_roster(&document))
    }

    async fn start_run(&self, product_idea: &str, hitl_enabled: bool) -> Result<StartedRun, ApiError> {
        let body = StartRequest {
            product_idea,
            hitl_enabled,
        };
        self.post_json(self.endpoint(&["run"])?, &body).await
    }

    async fn resume_run(&self, run_id: &str, hitl_enabled: bool) -> Result<(), ApiError> {
        let _: Value = self
            .post_json(
                self.endpoint(&["resume", run_id])?,
                &ResumeRequest { hitl_enabled },
            )
            .await?;
        Ok(())
    }

    async fn stop_run(&self, run_id: &str) -> Result<(), ApiError> {
        let _: Value = self
            .post_json(self.endpoint(&["stop", run_id])?, &Value::Object(Default::default()))
            .await?;
        Ok(())
    }

    async fn fetch_artifact(&self, filename: &str, run_id: Option<&str>) -> Result<String, ApiError> {
        let mut url = self.endpoint(&["artifact"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("filename", filename);
            if let Some(run_id) = run_id {
                query.append_pair("run_id", run_id);
            }
        }
        let envelope: ArtifactEnvelope = self.get_json(url).await?;
        envelope.into_content()
    }

    async fn list_run_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>, ApiError> {
        let envelope: ArtifactsEnvelope = self
            .get_json(self.endpoint(&["runs", run_id, "artifacts"])?)
            .await?;
        Ok(envelope.artifacts)
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ApiError> {
    let mut url = base.clone();
    url.set_query(None);
    url.path_segments_mut()
        .map_err(|_| ApiError::Transport(format!("base url cannot carry a path: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            body: truncate_chars(body.trim(), MAX_ERROR_BODY_CHARS),
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|err| ApiError::Decode(err.to_string()))
}

fn truncate_chars(input: &str, limit: usize) -> String {
    match input.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &input[..cut]),
        None => input.to_string(),
    }
}
