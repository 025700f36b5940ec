//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::utils::retry::RetryPolicy;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Configuration for the coordinator: HTTP server, allocation and demand polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Server bind address
    pub bind_address: String,

    /// Number of sequence numbers per batch
    pub batch_size: u64,

    /// Start of the very first batch when the store is empty
    pub start_at: u64,

    /// Extra allocation attempts after a unique-start conflict
    pub max_conflict_retries: u32,

    /// Delay between demand polls in seconds
    pub poll_interval_secs: u64,

    /// Total retry budget for one demand poll in seconds
    pub poll_max_elapsed_secs: u64,

    /// Timeout for one stats request in seconds
    pub stats_timeout_secs: u64,

    /// Enable CORS for API
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            batch_size: 100_000,
            start_at: 0,
            max_conflict_retries: 5,
            poll_interval_secs: 5,
            poll_max_elapsed_secs: 15 * 60,
            stats_timeout_secs: 10,
            enable_cors: false,
            enable_request_logging: true,
        }
    }
}

impl CoordinatorConfig {
    /// Create a new config builder
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    /// Parsed bind address
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                field: "bind_address".to_string(),
                reason: format!("Invalid address: {}", self.bind_address),
            })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stats_timeout(&self) -> Duration {
        Duration::from_secs(self.stats_timeout_secs)
    }

    /// Backoff applied to a failing demand poll
    pub fn poll_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_elapsed_time: Some(Duration::from_secs(self.poll_max_elapsed_secs)),
            ..RetryPolicy::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;

        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch_size".to_string(),
                reason: "Batches must cover at least one sequence number".to_string(),
            });
        }

        if self.start_at.checked_add(self.batch_size).is_none() {
            return Err(ConfigError::InvalidValue {
                field: "start_at".to_string(),
                reason: "First batch would overflow the sequence space".to_string(),
            });
        }

        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_secs".to_string(),
                reason: "Must be at least 1 second".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for CoordinatorConfig
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
    bind_address: Option<String>,
    batch_size: Option<u64>,
    start_at: Option<u64>,
    max_conflict_retries: Option<u32>,
    poll_interval_secs: Option<u64>,
    poll_max_elapsed_secs: Option<u64>,
    enable_cors: Option<bool>,
    enable_request_logging: Option<bool>,
}

impl CoordinatorConfigBuilder {
    /// Set bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr.to_string());
        self
    }

    /// Set bind address from string
    pub fn bind_address_str(mut self, addr: &str) -> Result<Self, ConfigError> {
        let parsed: SocketAddr = addr.parse().map_err(|_| ConfigError::InvalidValue {
            field: "bind_address".to_string(),
            reason: format!("Invalid address: {}", addr),
        })?;
        self.bind_address = Some(parsed.to_string());
        Ok(self)
    }

    pub fn batch_size(mut self, size: u64) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn start_at(mut self, start: u64) -> Self {
        self.start_at = Some(start);
        self
    }

    pub fn max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = Some(retries);
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = Some(secs);
        self
    }

    pub fn poll_max_elapsed_secs(mut self, secs: u64) -> Self {
        self.poll_max_elapsed_secs = Some(secs);
        self
    }

    /// Enable/disable CORS
    pub fn enable_cors(mut self, enable: bool) -> Self {
        self.enable_cors = Some(enable);
        self
    }

    /// Enable/disable request logging
    pub fn enable_request_logging(mut self, enable: bool) -> Self {
        self.enable_request_logging = Some(enable);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<CoordinatorConfig, ConfigError> {
        let defaults = CoordinatorConfig::default();
        let config = CoordinatorConfig {
            bind_address: self.bind_address.unwrap_or(defaults.bind_address),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            start_at: self.start_at.unwrap_or(defaults.start_at),
            max_conflict_retries: self
                .max_conflict_retries
                .unwrap_or(defaults.max_conflict_retries),
            poll_interval_secs: self.poll_interval_secs.unwrap_or(defaults.poll_interval_secs),
            poll_max_elapsed_secs: self
                .poll_max_elapsed_secs
                .unwrap_or(defaults.poll_max_elapsed_secs),
            stats_timeout_secs: defaults.stats_timeout_secs,
            enable_cors: self.enable_cors.unwrap_or(defaults.enable_cors),
            enable_request_logging: self
                .enable_request_logging
                .unwrap_or(defaults.enable_request_logging),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue { field: String, reason: String },
    MissingField { field: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
            Self::MissingField { field } => {
                write!(f, "Missing required field: {}", field)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
