//! REST client for the job controller.
//!
//! Wraps the pull operations (snapshot, event list) and the operator
//! commands using [`reqwest`]. The [`JobBackend`] trait is the seam the
//! driver depends on, so tests can swap in an in-memory backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use jobwatch_core::commands::Command;
use jobwatch_core::error::CommandError;
use jobwatch_core::event::JobEvent;
use jobwatch_core::payload;
use jobwatch_core::snapshot::JobSnapshot;

/// Pull and command operations the sync driver needs.
#[async_trait]
pub trait JobBackend: Send + Sync + 'static {
    /// Point-in-time job snapshot.
    async fn snapshot(&self, job_id: &str) -> Result<JobSnapshot, ApiError>;

    /// Most recent events, newest first, at most `limit` of them.
    async fn events(&self, job_id: &str, limit: u32) -> Result<Vec<JobEvent>, ApiError>;

    /// Send an operator command. Returns the controller's confirmation
    /// message.
    async fn command(&self, job_id: &str, command: &Command) -> Result<String, ApiError>;
}

/// Errors from the job REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The controller answered with a non-2xx status.
    #[error("Job API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Server-provided message, or the raw body.
        message: String,
    },
}

impl From<ApiError> for CommandError {
    /// A controller refusal keeps its message verbatim; anything else is a
    /// transport problem.
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Api { message, .. } => CommandError::Rejected(message),
            other => CommandError::Transport(other.to_string()),
        }
    }
}

/// Event lists come either bare or wrapped in `{"events": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum EventList {
    Bare(Vec<JobEvent>),
    Wrapped { events: Vec<JobEvent> },
}

/// Snapshots come either bare or wrapped in `{"job": {...}}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotBody {
    Wrapped { job: JobSnapshot },
    Bare(JobSnapshot),
}

#[derive(Deserialize)]
struct CommandResponse {
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for one job controller.
pub struct JobApi {
    client: reqwest::Client,
    api_url: String,
}

impl JobApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base URL including any prefix, e.g. `http://host:8000/api`.
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}/jobs/{}", self.api_url, job_id)
    }

    // ---- private helpers ----

    /// Turn a non-2xx response into [`ApiError::Api`], pulling the message
    /// out of a JSON body when there is one.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|json| payload::string(&json, &["error", "detail", "message"]))
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                } else {
                    body
                }
            });
        Err(ApiError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl JobBackend for JobApi {
    /// `GET {api}/jobs/{id}`
    async fn snapshot(&self, job_id: &str) -> Result<JobSnapshot, ApiError> {
        let response = self.client.get(self.job_url(job_id)).send().await?;
        let body: SnapshotBody = Self::parse_response(response).await?;
        Ok(match body {
            SnapshotBody::Wrapped { job } => job,
            SnapshotBody::Bare(snapshot) => snapshot,
        })
    }

    /// `GET {api}/jobs/{id}/events?limit=N`
    async fn events(&self, job_id: &str, limit: u32) -> Result<Vec<JobEvent>, ApiError> {
        let response = self
            .client
            .get(format!("{}/events", self.job_url(job_id)))
            .query(&[("limit", limit)])
            .send()
            .await?;
        let list: EventList = Self::parse_response(response).await?;
        Ok(match list {
            EventList::Wrapped { events } => events,
            EventList::Bare(events) => events,
        })
    }

    /// `POST {api}/jobs/{id}/{pause|resume|cancel|retry}`
    async fn command(&self, job_id: &str, command: &Command) -> Result<String, ApiError> {
        let kind = command.kind();
        let response = self
            .client
            .post(format!("{}/{}", self.job_url(job_id), kind.as_str()))
            .json(&command.body())
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        // Some controllers answer 204 or plain text; only the status matters.
        let text = response.text().await?;
        let message = serde_json::from_str::<CommandResponse>(&text)
            .ok()
            .and_then(|r| r.message)
            .unwrap_or_default();
        tracing::debug!(job_id = %job_id, command = %kind, "Command confirmed");
        Ok(message)
    }
}
