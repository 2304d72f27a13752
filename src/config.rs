use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::{RecoError, Result};

pub const DEFAULT_SERVER: &str = "https://api.reconfigure.io";
pub const SERVER_ENV: &str = "PLATFORM_SERVER";
pub const USER_ENV: &str = "RECO_USER";
pub const TOKEN_ENV: &str = "RECO_TOKEN";

/// Connection settings for the build service.
///
/// Passed explicitly into every API call instead of living in shared
/// client state.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the platform, always with a scheme
    pub server_url: String,
    pub username: String,
    pub token: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER.to_string(),
            username: String::new(),
            token: String::new(),
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: &str) -> Self {
        Self {
            server_url: normalize_server(server_url),
            ..Default::default()
        }
    }

    /// Build a config from `PLATFORM_SERVER`, `RECO_USER` and `RECO_TOKEN`.
    pub fn from_env() -> Self {
        let server = std::env::var(SERVER_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVER.to_string());
        Self {
            server_url: normalize_server(&server),
            username: std::env::var(USER_ENV).unwrap_or_default(),
            token: std::env::var(TOKEN_ENV).unwrap_or_default(),
        }
    }

    pub fn with_credentials(mut self, username: &str, token: &str) -> Self {
        self.username = username.to_string();
        self.token = token.to_string();
        self
    }

    /// Apply a dashboard API key of the form `<user>_<id>_<token>`.
    pub fn with_api_key(self, key: &str) -> Result<Self> {
        let parts: Vec<&str> = key.trim().split('_').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(RecoError::InvalidApiKey);
        }
        let username = format!("{}_{}", parts[0], parts[1]);
        Ok(self.with_credentials(&username, parts[2]))
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.token.is_empty()
    }

    /// Join an API path onto the server URL.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.server_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn normalize_server(server: &str) -> String {
    if server.contains("://") {
        server.to_string()
    } else {
        format!("http://{}", server)
    }
}

/// How long and how often status polling retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Pause between two status fetches
    pub interval: Duration,
    /// Give up after this long. `None` polls until a terminal status.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            deadline: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Local interface the relay listens on. The port is always OS-assigned.
    pub bind_ip: IpAddr,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}
