use std::convert::Infallible;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Error code the service attaches to an ERRORED event when the job ran
/// out of time.
pub const TIMEOUT_EXIT_CODE: i64 = 124;

/// Status of a remote job.
///
/// The service sends these as upper-case tokens. `Unstarted` and
/// `TimedOut` are never sent, they are derived from the event history.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Unstarted,
    Submitted,
    Queued,
    CreatingImage,
    Started,
    Terminating,
    Terminated,
    Completed,
    Errored,
    TimedOut,
    Other(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Unstarted => "unstarted",
            JobStatus::Submitted => "submitted",
            JobStatus::Queued => "queued",
            JobStatus::CreatingImage => "creating_image",
            JobStatus::Started => "started",
            JobStatus::Terminating => "terminating",
            JobStatus::Terminated => "terminated",
            JobStatus::Completed => "completed",
            JobStatus::Errored => "errored",
            JobStatus::TimedOut => "timed-out",
            JobStatus::Other(s) => s,
        }
    }

    /// Upper-case form used in polling output, e.g. `CREATING_IMAGE`.
    pub fn to_upper(&self) -> String {
        self.as_str().to_uppercase()
    }

    /// COMPLETED, ERRORED or TERMINATED.
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Errored | JobStatus::Terminated
        )
    }

    pub fn is_started(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Errored
                | JobStatus::Terminated
                | JobStatus::Terminating
                | JobStatus::Started
                | JobStatus::CreatingImage
        )
    }

    /// A status no further transition is expected from. Unlike
    /// [`is_completed`](Self::is_completed) this includes the synthetic
    /// `TimedOut`.
    pub fn is_terminal(&self) -> bool {
        self.is_completed() || *self == JobStatus::TimedOut
    }
}

impl FromStr for JobStatus {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.trim().to_uppercase().as_str() {
            "UNSTARTED" => JobStatus::Unstarted,
            "SUBMITTED" => JobStatus::Submitted,
            "QUEUED" => JobStatus::Queued,
            "CREATING_IMAGE" => JobStatus::CreatingImage,
            "STARTED" => JobStatus::Started,
            "TERMINATING" => JobStatus::Terminating,
            "TERMINATED" => JobStatus::Terminated,
            "COMPLETED" => JobStatus::Completed,
            "ERRORED" => JobStatus::Errored,
            "TIMED-OUT" => JobStatus::TimedOut,
            _ => JobStatus::Other(s.trim().to_lowercase()),
        };
        Ok(status)
    }
}

impl From<&str> for JobStatus {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(status) => status,
            Err(never) => match never {},
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True iff `status` is COMPLETED, ERRORED or TERMINATED, ignoring case.
pub fn is_completed(status: &str) -> bool {
    JobStatus::from(status).is_completed()
}

/// True iff the job has left the submission queue.
pub fn is_started(status: &str) -> bool {
    JobStatus::from(status).is_started()
}

/// One state transition reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub status: String,
    #[serde(default)]
    pub code: i64,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, status: &str) -> Self {
        Self {
            timestamp,
            status: status.to_string(),
            code: 0,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    fn is_timeout(&self) -> bool {
        JobStatus::from(self.status.as_str()) == JobStatus::Errored
            && self.code == TIMEOUT_EXIT_CODE
    }
}

/// Status fields computed from an event history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedStatus {
    pub status: JobStatus,
    /// Timestamp of the earliest event
    pub started_at: Option<DateTime<Utc>>,
    /// Only set once the job has reached a completed status
    pub duration: Option<Duration>,
}

impl DerivedStatus {
    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }

    pub fn is_started(&self) -> bool {
        self.status.is_started()
    }
}

/// Sort `events` by timestamp and derive the job's current status.
///
/// When a job has at least three events and the second-to-last one is
/// already completed, the last event is a late housekeeping record (for
/// example TERMINATED after COMPLETED) and the earlier one wins. Any
/// ERRORED event with code 124 turns the result into `TimedOut`.
pub fn derive_status(events: &mut [Event]) -> DerivedStatus {
    events.sort_by_key(|e| e.timestamp);

    let (first, true_last) = match (events.first(), events.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            return DerivedStatus {
                status: JobStatus::Unstarted,
                started_at: None,
                duration: None,
            }
        }
    };

    let mut last = true_last;
    if events.len() > 2 {
        let prior = &events[events.len() - 2];
        if is_completed(&prior.status) {
            last = prior;
        }
    }

    let status = if events.iter().any(Event::is_timeout) {
        JobStatus::TimedOut
    } else {
        JobStatus::from(last.status.as_str())
    };

    let duration = if events.len() >= 2 && is_completed(&true_last.status) {
        Some(last.timestamp - first.timestamp)
    } else {
        None
    };

    DerivedStatus {
        status,
        started_at: Some(first.timestamp),
        duration,
    }
}
