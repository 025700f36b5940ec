//! Coordinator client for workers
//!
//! Workers use this client to report batch attempts and completions back to
//! the coordinator. Every request carries the worker's identity and secret.

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::api::{ApiResponse, AttemptRequest, CompletionResponse, HealthResponse};
use super::auth::{WORKER_ID_HEADER, WORKER_SECRET_HEADER};
use crate::models::{Batch, BatchId};
use crate::storage::BatchSummary;

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for the coordinator client
#[derive(Clone)]
pub struct ClientConfig {
    /// Coordinator server URL
    pub coordinator_url: String,

    /// Request timeout
    pub timeout: Duration,

    /// Retry count for failed requests
    pub retry_count: u32,

    /// Retry delay
    pub retry_delay: Duration,

    /// Worker identity sent with every request
    pub identity: String,

    /// Worker secret sent with every request
    pub secret: String,
}

impl ClientConfig {
    /// Create a new client config
    pub fn new(
        coordinator_url: impl Into<String>,
        identity: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            coordinator_url: coordinator_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(10),
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
            identity: identity.into(),
            secret: secret.into(),
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set retry count
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Set retry delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("coordinator_url", &self.coordinator_url)
            .field("timeout", &self.timeout)
            .field("retry_count", &self.retry_count)
            .field("retry_delay", &self.retry_delay)
            .field("identity", &self.identity)
            .field("secret", &crate::utils::mask_secret(&self.secret))
            .finish()
    }
}

// ============================================================================
// Coordinator Client
// ============================================================================

/// Client for communicating with the Coordinator server
pub struct CoordinatorClient {
    config: ClientConfig,
    http_client: Client,
}

impl CoordinatorClient {
    /// Create a new coordinator client
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .user_agent(crate::utils::user_agent("worker"))
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Check coordinator health
    pub async fn health_check(&self) -> Result<HealthStatus, ClientError> {
        let url = format!("{}/api/health", self.config.coordinator_url);

        let health: HealthResponse = self.get_with_retry(&url).await?;
        Ok(HealthStatus {
            healthy: health.status == "healthy",
            version: health.version,
            uptime_secs: health.uptime_secs,
        })
    }

    /// Report that this worker picked up a batch
    pub async fn report_attempt(
        &self,
        batch_id: &BatchId,
        user_agent: &str,
    ) -> Result<Batch, ClientError> {
        let url = format!(
            "{}/api/batches/{}/attempts",
            self.config.coordinator_url, batch_id
        );
        let request = AttemptRequest {
            user_agent: Some(user_agent.to_string()),
        };

        self.post_with_retry(&url, &request).await
    }

    /// Report a batch as completed
    ///
    /// Returns `false` if the coordinator had already recorded the completion.
    pub async fn report_completion(&self, batch_id: &BatchId) -> Result<bool, ClientError> {
        let url = format!(
            "{}/api/batches/{}/complete",
            self.config.coordinator_url, batch_id
        );

        let response: CompletionResponse = self.post_with_retry(&url, &()).await?;
        Ok(response.completed)
    }

    /// Fetch a batch by id
    pub async fn get_batch(&self, batch_id: &BatchId) -> Result<Batch, ClientError> {
        let url = format!("{}/api/batches/{}", self.config.coordinator_url, batch_id);
        self.get_with_retry(&url).await
    }

    /// Fetch batch totals
    pub async fn summary(&self) -> Result<BatchSummary, ClientError> {
        let url = format!("{}/api/batches/summary", self.config.coordinator_url);
        self.get_with_retry(&url).await
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(WORKER_ID_HEADER, &self.config.identity)
            .header(WORKER_SECRET_HEADER, &self.config.secret)
    }

    // Internal: GET request with retry
    async fn get_with_retry<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
    ) -> Result<T, ClientError> {
        self.send_with_retry(|| self.authorize(self.http_client.get(url)))
            .await
    }

    // Internal: POST request with retry
    async fn post_with_retry<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<R, ClientError> {
        self.send_with_retry(|| self.authorize(self.http_client.post(url).json(body)))
            .await
    }

    async fn send_with_retry<R, F>(&self, build: F) -> Result<R, ClientError>
    where
        R: for<'de> Deserialize<'de>,
        F: Fn() -> RequestBuilder,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }

            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.json::<ApiResponse<R>>().await {
                            Ok(ApiResponse {
                                data: Some(data), ..
                            }) => return Ok(data),
                            Ok(ApiResponse { error, .. }) => {
                                return Err(ClientError::InvalidResponse(
                                    error.unwrap_or_else(|| "Missing response data".to_string()),
                                ));
                            }
                            Err(e) => {
                                last_error = Some(ClientError::ParseError(e.to_string()));
                            }
                        }
                    } else {
                        let error = ClientError::HttpError {
                            status: status.as_u16(),
                            message: response.text().await.unwrap_or_default(),
                        };
                        // Retrying will not fix a rejected request
                        if status.is_client_error() {
                            return Err(error);
                        }
                        last_error = Some(error);
                    }
                }
                Err(e) => {
                    last_error = Some(ClientError::NetworkError(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or(ClientError::CoordinatorUnavailable))
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// Health status
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub version: String,
    pub uptime_secs: u64,
}

// ============================================================================
// Client Errors
// ============================================================================

/// Client errors
#[derive(Debug, Clone)]
pub enum ClientError {
    /// Initialization error
    InitError(String),

    /// Network error
    NetworkError(String),

    /// HTTP error
    HttpError { status: u16, message: String },

    /// Parse error
    ParseError(String),

    /// Invalid response
    InvalidResponse(String),

    /// Coordinator unavailable
    CoordinatorUnavailable,
}

impl ClientError {
    /// Whether the coordinator rejected the worker's credentials
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::HttpError { status: 401, .. })
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitError(msg) => write!(f, "Initialization error: {}", msg),
            Self::NetworkError(msg) => write!(f, "Network error: {}", msg),
            Self::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            Self::ParseError(msg) => write!(f, "Parse error: {}", msg),
            Self::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            Self::CoordinatorUnavailable => write!(f, "Coordinator unavailable"),
        }
    }
}

impl std::error::Error for ClientError {}

// ============================================================================
// Tests
// ============================================================================
