//! Configuration management for seqharvest
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files. Every section has defaults, so a config file only
//! needs the values it changes. Environment variables override file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::coordinator::CoordinatorConfig;
use crate::crawler::WorkerSettings;
use crate::utils::mask_secret;
use crate::utils::retry::RetryPolicy;

/// A secret value that never shows up in `Debug` output
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&mask_secret(&self.0))
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordinator server, allocation and demand polling
    pub coordinator: CoordinatorConfig,

    /// Harvesting worker
    pub worker: WorkerConfig,

    /// NSQ broker endpoints
    pub broker: BrokerConfig,

    /// Steam Web API
    pub steam: SteamConfig,

    /// Database files and the storage consumer
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Worker-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Identity presented to the coordinator
    pub identity: String,

    /// Shared secret for the coordinator API and the broker
    pub secret: Secret,

    /// Coordinator base URL
    pub coordinator_url: String,

    /// Pause between page fetches in milliseconds
    pub page_delay_ms: u64,

    /// Pages without progress before an attempt is abandoned
    pub max_empty_pages: u32,

    pub fetch_initial_interval_ms: u64,
    pub fetch_max_interval_secs: u64,

    /// Retry budget for one page fetch in seconds
    pub fetch_max_elapsed_secs: u64,

    /// Requeue delay after a failed attempt (0 = broker default)
    pub requeue_delay_secs: u64,

    /// Requeue delay after catching up with the live edge
    pub caught_up_delay_secs: u64,

    /// Broker visibility timeout for one batch
    pub msg_timeout_secs: u64,

    /// TOUCH the in-flight batch this often; must be below `msg_timeout_secs`
    pub touch_interval_secs: u64,
}

/// NSQ broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// nsqd TCP address
    pub tcp_address: String,

    /// nsqd HTTP base URL, used for stats
    pub http_address: String,

    /// Auth secret for the coordinator and storage consumer
    pub auth_secret: Option<Secret>,

    /// Interval for heartbeats requested from nsqd
    pub heartbeat_interval_secs: u64,
}

/// Steam Web API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SteamConfig {
    pub api_key: Secret,

    /// API base URL
    pub base_url: String,

    /// Page size requested per call (API default when unset)
    pub matches_requested: Option<u32>,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding batches
    pub batches_path: PathBuf,

    /// SQLite database holding worker credentials
    pub credentials_path: PathBuf,

    /// SQLite database holding harvested records
    pub records_path: PathBuf,

    /// Requeue delay for records that failed to store
    pub requeue_delay_secs: u64,

    /// Drop a record after this many deliveries (0 = never)
    pub max_attempts: u16,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            identity: crate::utils::local_hostname(),
            secret: Secret::default(),
            coordinator_url: String::from("http://localhost:8080"),
            page_delay_ms: 1000,
            max_empty_pages: 3,
            fetch_initial_interval_ms: 1000,
            fetch_max_interval_secs: 60,
            fetch_max_elapsed_secs: 20 * 60,
            requeue_delay_secs: 0,
            caught_up_delay_secs: 10 * 60,
            msg_timeout_secs: 30 * 60,
            touch_interval_secs: 15 * 60,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            tcp_address: String::from("127.0.0.1:4150"),
            http_address: String::from("http://localhost:4151"),
            auth_secret: None,
            heartbeat_interval_secs: 30,
        }
    }
}

impl Default for SteamConfig {
    fn default() -> Self {
        Self {
            api_key: Secret::default(),
            base_url: String::from(crate::crawler::api::STEAM_API_BASE),
            matches_requested: None,
            request_timeout_secs: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            batches_path: PathBuf::from("data/batches.db"),
            credentials_path: PathBuf::from("data/workers.db"),
            records_path: PathBuf::from("data/records.db"),
            requeue_delay_secs: 5,
            max_attempts: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_string(name)
        .map(|v| {
            v.parse::<T>()
                .with_context(|| format!("Invalid value for {name}: {v}"))
        })
        .transpose()
}

impl Config {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `path` if given, otherwise from defaults; then apply the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_env_overrides()
    }

    /// Apply `SEQHARVEST_*` variables and the conventional unprefixed names
    pub fn with_env_overrides(mut self) -> Result<Self> {
        // Coordinator
        if let Some(v) = env_string("SEQHARVEST_BIND_ADDRESS") {
            self.coordinator.bind_address = v;
        }
        if let Some(v) = env_parse("SEQHARVEST_BATCH_SIZE")? {
            self.coordinator.batch_size = v;
        }
        if let Some(v) = env_parse("SEQHARVEST_START_AT")? {
            self.coordinator.start_at = v;
        }
        if let Some(v) = env_parse("SEQHARVEST_POLL_INTERVAL")? {
            self.coordinator.poll_interval_secs = v;
        }

        // Worker
        if let Some(v) = env_string("SEQHARVEST_WORKER_ID") {
            self.worker.identity = v;
        }
        if let Some(v) = env_string("WORKER_SECRET").or_else(|| env_string("SEQHARVEST_WORKER_SECRET")) {
            self.worker.secret = Secret::new(v);
        }
        if let Some(v) = env_string("SEQHARVEST_COORDINATOR_URL") {
            self.worker.coordinator_url = v;
        }
        if let Some(v) = env_parse("SEQHARVEST_PAGE_DELAY_MS")? {
            self.worker.page_delay_ms = v;
        }

        // Broker
        if let Some(v) = env_string("NSQ_ADDRESS").or_else(|| env_string("SEQHARVEST_NSQ_ADDRESS")) {
            self.broker.tcp_address = v;
        }
        if let Some(v) = env_string("SEQHARVEST_NSQ_HTTP_ADDRESS") {
            self.broker.http_address = v;
        }
        if let Some(v) = env_string("NSQ_SECRET").or_else(|| env_string("SEQHARVEST_NSQ_SECRET")) {
            self.broker.auth_secret = Some(Secret::new(v));
        }

        // Steam
        if let Some(v) = env_string("STEAM_API_KEY").or_else(|| env_string("SEQHARVEST_STEAM_API_KEY")) {
            self.steam.api_key = Secret::new(v);
        }
        if let Some(v) = env_string("SEQHARVEST_STEAM_BASE_URL") {
            self.steam.base_url = v;
        }

        // Storage
        if let Some(v) = env_string("SEQHARVEST_BATCHES_PATH") {
            self.storage.batches_path = v.into();
        }
        if let Some(v) = env_string("SEQHARVEST_CREDENTIALS_PATH") {
            self.storage.credentials_path = v.into();
        }
        if let Some(v) = env_string("SEQHARVEST_RECORDS_PATH").or_else(|| env_string("LEVELDB_PATH")) {
            self.storage.records_path = v.into();
        }

        // Logging
        if let Some(v) = env_string("SEQHARVEST_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env_string("SEQHARVEST_LOG_FORMAT") {
            self.logging.format = v;
        }

        Ok(self)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.coordinator
            .validate()
            .map_err(|e| anyhow::anyhow!("coordinator: {e}"))?;

        if self.worker.max_empty_pages == 0 {
            anyhow::bail!("worker.max_empty_pages must be greater than 0");
        }

        if self.worker.msg_timeout_secs == 0 {
            anyhow::bail!("worker.msg_timeout_secs must be greater than 0");
        }

        if self.worker.touch_interval_secs == 0
            || self.worker.touch_interval_secs >= self.worker.msg_timeout_secs
        {
            anyhow::bail!("worker.touch_interval_secs must be between 1 and msg_timeout_secs - 1");
        }

        if self.broker.tcp_address.is_empty() {
            anyhow::bail!("broker.tcp_address must be set");
        }

        url::Url::parse(&self.broker.http_address)
            .with_context(|| format!("Invalid broker.http_address: {}", self.broker.http_address))?;
        url::Url::parse(&self.worker.coordinator_url)
            .with_context(|| format!("Invalid worker.coordinator_url: {}", self.worker.coordinator_url))?;

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Worker crawl settings
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            fetch_retry: RetryPolicy::new(
                Duration::from_millis(self.worker.fetch_initial_interval_ms),
                Duration::from_secs(self.worker.fetch_max_interval_secs),
                Duration::from_secs(self.worker.fetch_max_elapsed_secs),
            ),
            page_delay: Duration::from_millis(self.worker.page_delay_ms),
            max_empty_pages: self.worker.max_empty_pages,
        }
    }

    #[must_use]
    pub fn requeue_delay(&self) -> Duration {
        Duration::from_secs(self.worker.requeue_delay_secs)
    }

    #[must_use]
    pub fn caught_up_delay(&self) -> Duration {
        Duration::from_secs(self.worker.caught_up_delay_secs)
    }

    #[must_use]
    pub fn msg_timeout(&self) -> Duration {
        Duration::from_secs(self.worker.msg_timeout_secs)
    }

    #[must_use]
    pub fn touch_interval(&self) -> Duration {
        Duration::from_secs(self.worker.touch_interval_secs)
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.broker.heartbeat_interval_secs)
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.steam.request_timeout_secs)
    }

    #[must_use]
    pub fn storage_requeue_delay(&self) -> Duration {
        Duration::from_secs(self.storage.requeue_delay_secs)
    }

    /// Human-readable summary with secrets masked
    pub fn display(&self) -> String {
        format!(
            "Configuration\n\
             {:-<40}\n\
             Coordinator: {} (batch size {})\n\
             Worker: {} -> {} (secret {})\n\
             Broker: {} / {} (secret {})\n\
             Steam API: {} (key {})\n\
             Storage: {} | {} | {}\n\
             Logging: {} ({})",
            "",
            self.coordinator.bind_address,
            self.coordinator.batch_size,
            self.worker.identity,
            self.worker.coordinator_url,
            mask_secret(self.worker.secret.expose()),
            self.broker.tcp_address,
            self.broker.http_address,
            mask_secret(self.broker.auth_secret.as_ref().map_or("", Secret::expose)),
            self.steam.base_url,
            mask_secret(self.steam.api_key.expose()),
            self.storage.batches_path.display(),
            self.storage.credentials_path.display(),
            self.storage.records_path.display(),
            self.logging.level,
            self.logging.format,
        )
    }
}
