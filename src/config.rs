use std::time::Duration;
use thiserror::Error;

use crate::connection::ConnectOptions;

pub const DEFAULT_ADDRESS: &str = "localhost:61613";
pub const DEFAULT_LOGIN: &str = "system";
pub const DEFAULT_PASSCODE: &str = "manager";
pub const DEFAULT_HEARTBEAT: &str = "10000,10000";

/// Configuration problems detected before any network activity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for limit: {0} (must be greater than zero)")]
    InvalidLimit(i64),
    #[error("invalid queue provided: destination must not be empty")]
    EmptyQueue,
    #[error("invalid heart-beat '{0}': expected two comma separated millisecond values")]
    InvalidHeartbeat(String),
}

/// Everything one worker run needs, built once at startup.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Broker `host:port`.
    pub address: String,
    pub login: String,
    pub passcode: String,
    /// Virtual host for the handshake `host` header.
    pub vhost: String,
    /// Client heart-beat header, "cx,cy" in milliseconds.
    pub heartbeat: String,
    /// Destination to subscribe to.
    pub queue: String,
    /// Extra SUBSCRIBE headers.
    pub subscription_headers: Vec<(String, String)>,
    /// Command template; the payload is appended as the last argument.
    pub command: String,
    /// Number of messages to consume. Signed so that bad input can be
    /// reported as given.
    pub limit: i64,
    /// Bound on waiting for each message. `None` waits forever.
    pub receive_timeout: Option<Duration>,
    /// Forward the command's stdout/stderr.
    pub show_output: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            login: DEFAULT_LOGIN.to_string(),
            passcode: DEFAULT_PASSCODE.to_string(),
            vhost: "/".to_string(),
            heartbeat: DEFAULT_HEARTBEAT.to_string(),
            queue: String::new(),
            subscription_headers: Vec::new(),
            command: String::new(),
            limit: 0,
            receive_timeout: None,
            show_output: false,
        }
    }
}

impl WorkerConfig {
    /// Check the configuration and return the message limit as an unsigned
    /// count.
    pub fn validate(&self) -> Result<u64, ConfigError> {
        if self.limit <= 0 {
            return Err(ConfigError::InvalidLimit(self.limit));
        }
        if self.queue.is_empty() {
            return Err(ConfigError::EmptyQueue);
        }
        if !is_valid_heartbeat(&self.heartbeat) {
            return Err(ConfigError::InvalidHeartbeat(self.heartbeat.clone()));
        }
        Ok(self.limit.unsigned_abs())
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::default()
            .with_heartbeat(self.heartbeat.clone())
            .with_host(self.vhost.clone())
    }
}

fn is_valid_heartbeat(value: &str) -> bool {
    let parts: Vec<&str> = value.split(',').collect();
    parts.len() == 2 && parts.iter().all(|p| p.trim().parse::<u64>().is_ok())
}
