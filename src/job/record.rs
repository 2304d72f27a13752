use serde::Deserialize;

use crate::job::status::{derive_status, DerivedStatus, Event, JobStatus};

/// A job as last seen on the service. Re-fetched on every poll, never
/// updated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub id: String,
    pub project: Option<String>,
    pub command: Option<String>,
    pub build: Option<String>,
    pub ip_address: Option<String>,
    /// Sorted ascending by timestamp
    pub events: Vec<Event>,
    derived: DerivedStatus,
}

impl JobRecord {
    pub fn new(id: &str, mut events: Vec<Event>) -> Self {
        let derived = derive_status(&mut events);
        Self {
            id: id.to_string(),
            project: None,
            command: None,
            build: None,
            ip_address: None,
            events,
            derived,
        }
    }

    pub fn with_ip_address(mut self, ip: &str) -> Self {
        self.ip_address = Some(ip.to_string());
        self
    }

    pub fn derived(&self) -> &DerivedStatus {
        &self.derived
    }

    pub fn status(&self) -> &JobStatus {
        &self.derived.status
    }

    pub fn is_completed(&self) -> bool {
        self.derived.is_completed()
    }

    pub fn is_started(&self) -> bool {
        self.derived.is_started()
    }
}

/// Job object as returned by the job endpoints.
///
/// Deployments carry their events at the top level while builds and
/// simulations nest them under `job`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiJob {
    #[serde(default)]
    id: String,
    #[serde(default)]
    job: Option<ApiJobEvents>,
    #[serde(default)]
    project: Option<ApiNamed>,
    #[serde(default)]
    build: Option<ApiBuild>,
    #[serde(default)]
    events: Vec<Event>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    ip_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiJobEvents {
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiNamed {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiBuild {
    #[serde(default)]
    id: String,
}

/// `{"value": ..., "error": ...}` wrapper around every response body.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub value: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

impl From<ApiJob> for JobRecord {
    fn from(api: ApiJob) -> Self {
        let nested = api.job.map(|j| j.events).unwrap_or_default();
        let events = if nested.is_empty() { api.events } else { nested };

        let mut record = JobRecord::new(&api.id, events);
        record.project = api.project.map(|p| p.name).and_then(non_empty);
        record.build = api.build.map(|b| b.id).and_then(non_empty);
        record.command = api.command.and_then(non_empty);
        record.ip_address = api.ip_address.and_then(non_empty);
        record
    }
}
