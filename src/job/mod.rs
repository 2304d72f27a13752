//! Remote jobs and their status.
//!
//! - [`JobType`]: which kind of job an id refers to, and where it lives
//! - [`status`]: event histories and the status derived from them
//! - [`record`]: the decoded job resource
//! - [`query`]: filtering and ordering of job listings

pub mod query;
pub mod record;
pub mod status;

use std::str::FromStr;

pub use query::JobQuery;
pub use record::JobRecord;
pub use status::{derive_status, is_completed, is_started, DerivedStatus, Event, JobStatus};

/// Kind of job. Each kind has its own endpoint family on the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    Build,
    Simulation,
    Deployment,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Build => "build",
            JobType::Simulation => "simulation",
            JobType::Deployment => "deployment",
        }
    }

    /// Collection path, e.g. `/builds`.
    pub fn endpoint(&self) -> &'static str {
        match self {
            JobType::Build => "/builds",
            JobType::Simulation => "/simulations",
            JobType::Deployment => "/deployments",
        }
    }

    pub fn item_path(&self, id: &str) -> String {
        format!("{}/{}", self.endpoint(), id)
    }

    pub fn logs_path(&self, id: &str) -> String {
        format!("{}/{}/logs", self.endpoint(), id)
    }

    pub fn events_path(&self, id: &str) -> String {
        format!("{}/{}/events", self.endpoint(), id)
    }

    /// Explanation printed while a job of this type sits in `status`.
    pub fn waiting_hint(&self, status: &JobStatus) -> Option<&'static str> {
        match (self, status) {
            (JobType::Deployment, JobStatus::Queued) => {
                Some("Waiting for EC2 instance to be allocated")
            }
            (JobType::Deployment, JobStatus::Submitted) => {
                Some("Waiting for Spot Instance Request to be created")
            }
            (JobType::Build | JobType::Simulation, JobStatus::Queued) => {
                Some("Waiting for Batch job to start")
            }
            _ => None,
        }
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "build" | "builds" => Ok(JobType::Build),
            "simulation" | "simulations" | "test" => Ok(JobType::Simulation),
            "deployment" | "deployments" => Ok(JobType::Deployment),
            other => Err(format!(
                "unknown job type '{}', expected build, simulation or deployment",
                other
            )),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
