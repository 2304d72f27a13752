use super::{JobRecord, JobStatus};

/// Client-side selection over a job listing.
///
/// The service returns every job of a kind; filtering by status, ordering
/// and truncation all happen locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobQuery {
    /// Keep only jobs whose derived status equals this one
    pub status: Option<JobStatus>,
    /// Keep at most this many jobs. Zero means no limit.
    pub limit: Option<usize>,
}

impl JobQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, job: &JobRecord) -> bool {
        match &self.status {
            Some(status) => job.status() == status,
            None => true,
        }
    }

    /// Filter `jobs`, order them newest first by start time and truncate.
    ///
    /// Jobs without any event sort last. Ties keep the service's order.
    pub fn apply(&self, mut jobs: Vec<JobRecord>) -> Vec<JobRecord> {
        jobs.retain(|job| self.matches(job));
        jobs.sort_by(|a, b| b.derived().started_at.cmp(&a.derived().started_at));
        if let Some(limit) = self.limit.filter(|&n| n > 0) {
            jobs.truncate(limit);
        }
        jobs
    }
}
