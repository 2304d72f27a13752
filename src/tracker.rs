use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::JobApi;
use crate::config::RetryPolicy;
use crate::error::{RecoError, Result};
use crate::job::{JobQuery, JobRecord, JobStatus, JobType};

/// Polls the service for job status.
#[derive(Clone)]
pub struct StatusTracker {
    api: Arc<dyn JobApi>,
    policy: RetryPolicy,
}

impl StatusTracker {
    pub fn new(api: Arc<dyn JobApi>, policy: RetryPolicy) -> Self {
        Self { api, policy }
    }

    pub fn api(&self) -> &Arc<dyn JobApi> {
        &self.api
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch the job, keeping fetch failures distinguishable from a job
    /// that actually errored.
    pub async fn fetch(&self, job_type: JobType, id: &str) -> Result<JobRecord> {
        self.api.fetch_job(job_type, id).await
    }

    /// Jobs of `job_type` selected by `query`, newest first.
    pub async fn list(&self, job_type: JobType, query: &JobQuery) -> Result<Vec<JobRecord>> {
        let jobs = self.api.list_jobs(job_type).await?;
        let total = jobs.len();
        let jobs = query.apply(jobs);
        tracing::debug!(job_type = %job_type, total, selected = jobs.len(), "Listed jobs");
        Ok(jobs)
    }

    /// Current status of the job.
    ///
    /// Any fetch failure is reported as `Errored`, so callers cannot tell
    /// an unreachable service from a failed job. Use [`fetch`](Self::fetch)
    /// when that matters.
    pub async fn get_status(&self, job_type: JobType, id: &str) -> JobStatus {
        match self.fetch(job_type, id).await {
            Ok(record) => record.status().clone(),
            Err(e) => {
                tracing::warn!(job_type = %job_type, job_id = id, error = %e, "Status fetch failed");
                JobStatus::Errored
            }
        }
    }

    /// Poll until the job reaches `target`.
    ///
    /// Fails with `UnexpectedTermination` when the job reaches a different
    /// terminal status first. A status line is logged only when the status
    /// changes between polls.
    pub async fn wait_for_status(
        &self,
        job_type: JobType,
        id: &str,
        target: &JobStatus,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = self.policy.deadline.map(|limit| (Instant::now() + limit, limit));
        let mut previous: Option<JobStatus> = None;

        loop {
            let status = tokio::select! {
                _ = cancel.cancelled() => return Err(RecoError::Cancelled),
                status = self.get_status(job_type, id) => status,
            };

            if previous.as_ref() != Some(&status) {
                tracing::info!(job_id = id, "status: {}", status.to_upper());
                if let Some(hint) = job_type.waiting_hint(&status) {
                    tracing::info!(job_id = id, "{}", hint);
                }
                previous = Some(status.clone());
            }

            if &status == target {
                return Ok(());
            }
            if status.is_terminal() {
                return Err(RecoError::UnexpectedTermination {
                    expected: target.clone(),
                    actual: status,
                });
            }

            let mut wake = Instant::now() + self.policy.interval;
            if let Some((deadline, limit)) = deadline {
                if Instant::now() >= deadline {
                    return Err(RecoError::WaitDeadlineExceeded(limit));
                }
                wake = wake.min(deadline);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(RecoError::Cancelled),
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }
}
