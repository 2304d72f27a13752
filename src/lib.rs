pub mod api;
pub mod config;
pub mod error;
pub mod job;
pub mod logs;
pub mod orchestrator;
pub mod proxy;
pub mod shutdown;
pub mod tracker;

pub use api::{HttpJobApi, JobApi, LogReader};
pub use error::{RecoError, Result};
pub use job::{JobRecord, JobStatus, JobType};
pub use orchestrator::JobFollower;
pub use proxy::{Relay, RelayInfo};
pub use tracker::StatusTracker;
