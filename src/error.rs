use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum RecoError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication required. Set RECO_USER and RECO_TOKEN or pass --api-key")]
    AuthRequired,

    #[error("Authentication failed")]
    AuthFailed,

    #[error("The API key is invalid, expected <user>_<id>_<token>")]
    InvalidApiKey,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unexpected response status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Server error: {0}")]
    Api(String),

    #[error("Bad response from server: {0}")]
    BadResponse(String),

    #[error("Job ended without reaching desired state (wanted {expected}, got {actual})")]
    UnexpectedTermination {
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("Gave up waiting after {0:?}")]
    WaitDeadlineExceeded(Duration),

    #[error("Cancelled")]
    Cancelled,

    #[error("Instance {0} has shut down")]
    InstanceShutdown(String),

    #[error("Cannot {op} a log stream in state {state}")]
    InvalidLogState {
        op: &'static str,
        state: crate::logs::StreamState,
    },

    #[error("Proxy listener failed: {0}")]
    ProxyAccept(Arc<std::io::Error>),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for RecoError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RecoError::BadResponse(e.to_string())
        } else {
            RecoError::Network(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, RecoError>;
