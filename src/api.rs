//! Narrow interface to the build service.
//!
//! Everything the core needs from the service goes through [`JobApi`]:
//! fetching or listing jobs, opening a log stream and asking a job to stop.
//! [`HttpJobApi`] is the HTTP/JSON implementation.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::io::AsyncRead;
use tokio_stream::StreamExt;
use tokio_util::io::StreamReader;

use crate::config::ClientConfig;
use crate::error::{RecoError, Result};
use crate::job::record::{ApiJob, Envelope};
use crate::job::{JobRecord, JobStatus, JobType};

/// Raw bytes of a job's log, finite once the service closes the stream.
pub type LogReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait JobApi: Send + Sync {
    /// Fetch a fresh copy of the job.
    async fn fetch_job(&self, job_type: JobType, id: &str) -> Result<JobRecord>;

    /// Every job of this kind visible to the caller, in service order.
    async fn list_jobs(&self, job_type: JobType) -> Result<Vec<JobRecord>>;

    /// Open the job's log stream.
    async fn open_logs(&self, job_type: JobType, id: &str) -> Result<LogReader>;

    /// Ask the service to terminate the job.
    async fn stop_job(&self, job_type: JobType, id: &str) -> Result<()>;
}

/// [`JobApi`] over HTTP with basic auth.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpJobApi {
    http: Client,
    config: ClientConfig,
}

impl HttpJobApi {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder> {
        if !self.config.has_credentials() {
            return Err(RecoError::AuthRequired);
        }
        Ok(self
            .http
            .request(method, self.config.url(path))
            .basic_auth(&self.config.username, Some(&self.config.token)))
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<Response> {
        let resp = builder
            .send()
            .await
            .map_err(|e| RecoError::Network(e.to_string()))?;
        check_status(resp, what).await
    }
}

/// Map a response status onto the error taxonomy.
async fn check_status(resp: Response, what: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RecoError::AuthFailed),
        StatusCode::NOT_FOUND => Err(RecoError::NotFound(what.to_string())),
        _ => {
            let body = resp.text().await.unwrap_or_default();
            Err(RecoError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Decode a `{"value": ..., "error": ...}` body, surfacing the error field.
async fn decode_value<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let body = resp.bytes().await?;
    let envelope: Envelope<T> =
        serde_json::from_slice(&body).map_err(|e| RecoError::BadResponse(e.to_string()))?;
    if let Some(error) = envelope.error.filter(|e| !e.is_empty()) {
        return Err(RecoError::Api(error));
    }
    envelope
        .value
        .ok_or_else(|| RecoError::BadResponse("missing value".to_string()))
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn fetch_job(&self, job_type: JobType, id: &str) -> Result<JobRecord> {
        let req = self.request(reqwest::Method::GET, &job_type.item_path(id))?;
        let resp = self.send(req, &format!("{} {}", job_type, id)).await?;

        let job: ApiJob = decode_value(resp).await?;
        Ok(JobRecord::from(job))
    }

    async fn list_jobs(&self, job_type: JobType) -> Result<Vec<JobRecord>> {
        let req = self.request(reqwest::Method::GET, job_type.endpoint())?;
        let resp = self.send(req, &format!("{} list", job_type)).await?;

        let jobs: Vec<ApiJob> = decode_value(resp).await?;
        Ok(jobs.into_iter().map(JobRecord::from).collect())
    }

    async fn open_logs(&self, job_type: JobType, id: &str) -> Result<LogReader> {
        let req = self.request(reqwest::Method::GET, &job_type.logs_path(id))?;
        let resp = self.send(req, &format!("logs of {} {}", job_type, id)).await?;

        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }

    async fn stop_job(&self, job_type: JobType, id: &str) -> Result<()> {
        let req = self
            .request(reqwest::Method::POST, &job_type.events_path(id))?
            .json(&json!({ "status": JobStatus::Terminating.to_upper() }));
        let resp = self.send(req, &format!("{} {}", job_type, id)).await?;

        // anything but a plain 200 means the event was not recorded
        if resp.status() != StatusCode::OK {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RecoError::UnexpectedStatus { status, body });
        }
        tracing::info!(job_type = %job_type, job_id = id, "Stop requested");
        Ok(())
    }
}
