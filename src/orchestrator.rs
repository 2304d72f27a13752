use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::error::{RecoError, Result};
use crate::job::{JobStatus, JobType};
use crate::logs::LogStream;
use crate::tracker::StatusTracker;

/// How long a readiness probe against a deployed instance may take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Follows jobs from submission to log output.
///
/// Holds no per-job state, so one follower can serve any number of jobs
/// concurrently.
#[derive(Clone)]
pub struct JobFollower {
    tracker: StatusTracker,
}

impl JobFollower {
    pub fn new(tracker: StatusTracker) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    /// Wait for the job to start, then relay its log to `out`.
    ///
    /// Returns as soon as waiting fails; the log is never opened for a job
    /// that ended without starting.
    pub async fn wait_and_log<W>(
        &self,
        job_type: JobType,
        id: &str,
        out: &mut W,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        self.report_status(job_type, id).await;

        self.tracker
            .wait_for_status(job_type, id, &JobStatus::Started, cancel)
            .await?;

        self.report_status(job_type, id).await;

        let reader = self.tracker.api().open_logs(job_type, id).await?;
        let mut stream = LogStream::new(reader);

        tracing::info!(job_type = %job_type, job_id = id, "Waiting for log output");
        let started = tokio::select! {
            _ = cancel.cancelled() => return Err(RecoError::Cancelled),
            started = stream.peek(out) => started?,
        };
        if !started {
            tracing::info!(job_type = %job_type, job_id = id, "Log stream closed without output");
            return Ok(());
        }

        tracing::debug!(job_type = %job_type, job_id = id, "Streaming logs");
        let relayed = tokio::select! {
            _ = cancel.cancelled() => return Err(RecoError::Cancelled),
            relayed = stream.drain(out) => relayed?,
        };
        tracing::debug!(job_type = %job_type, job_id = id, bytes = relayed + 1, "Log stream finished");
        Ok(())
    }

    /// Relay the job's log as it is right now, without waiting.
    pub async fn log<W>(&self, job_type: JobType, id: &str, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        tracing::info!(job_type = %job_type, job_id = id, "Beginning log stream");
        let reader = self.tracker.api().open_logs(job_type, id).await?;
        LogStream::new(reader).drain(out).await?;
        Ok(())
    }

    /// Ask the service to stop the job.
    ///
    /// Deployments that already finished are left alone.
    pub async fn stop(&self, job_type: JobType, id: &str) -> Result<()> {
        if job_type == JobType::Deployment {
            let record = self.tracker.fetch(job_type, id).await?;
            if record.is_completed() {
                tracing::info!(job_id = id, status = %record.status(), "Deployment already finished");
                return Ok(());
            }
        }
        self.tracker.api().stop_job(job_type, id).await
    }

    /// Wait until a deployment accepts TCP connections on `port`.
    ///
    /// Returns the instance address once a probe connection succeeds, or
    /// `InstanceShutdown` if the deployment finishes first.
    pub async fn wait_for_instance(
        &self,
        id: &str,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<SocketAddr> {
        tracing::info!(job_id = id, port, "Waiting for deployment to listen");
        loop {
            let record = self.tracker.fetch(JobType::Deployment, id).await?;
            if record.is_completed() {
                return Err(RecoError::InstanceShutdown(id.to_string()));
            }

            if let Some(ip) = record.ip_address.as_deref() {
                let probe = format!("{}:{}", ip, port);
                match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(&probe)).await {
                    Ok(Ok(conn)) => {
                        let addr = conn.peer_addr()?;
                        drop(conn);
                        tracing::info!(job_id = id, addr = %addr, "Deployment ready");
                        return Ok(addr);
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(job_id = id, probe = %probe, error = %e, "Instance not reachable yet")
                    }
                    Err(_) => tracing::debug!(job_id = id, probe = %probe, "Probe timed out"),
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(RecoError::Cancelled),
                _ = tokio::time::sleep(self.tracker.policy().interval) => {}
            }
        }
    }

    async fn report_status(&self, job_type: JobType, id: &str) {
        let status = self.tracker.get_status(job_type, id).await;
        tracing::info!(job_type = %job_type, job_id = id, "status: {}", status.to_upper());
    }
}
