//! Coordinator server implementation
//!
//! This module provides the main server that orchestrates
//! all coordinator components: the HTTP API and the demand monitor.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::queue::Publisher;
use crate::storage::{BatchStore, CredentialStore};

use super::allocator::BatchAllocator;
use super::api::create_router;
use super::auth::AuthGate;
use super::config::CoordinatorConfig;
use super::demand::{DemandError, DemandMonitor, StatsSource};
use super::publisher::BatchPublisher;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Batch store
    pub batches: Arc<dyn BatchStore>,

    /// Allocator, used to close batches
    pub allocator: Arc<BatchAllocator<dyn BatchStore>>,

    /// Worker authentication
    pub auth: Arc<AuthGate<dyn CredentialStore>>,

    /// Server start time
    pub start_time: Instant,
}

// ============================================================================
// Coordinator Server
// ============================================================================

/// Main Coordinator server
pub struct CoordinatorServer {
    config: CoordinatorConfig,
    addr: SocketAddr,
    state: AppState,
}

impl CoordinatorServer {
    /// Create a new coordinator server
    pub fn new(
        config: CoordinatorConfig,
        batches: Arc<dyn BatchStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;
        let addr = config
            .socket_addr()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let state = AppState {
            allocator: Arc::new(BatchAllocator::from_config(batches.clone(), &config)),
            batches,
            auth: Arc::new(AuthGate::new(credentials)),
            start_time: Instant::now(),
        };

        Ok(Self {
            config,
            addr,
            state,
        })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build a demand monitor publishing through `publisher`
    pub fn demand_monitor<T, P>(&self, source: T, publisher: Arc<P>) -> DemandMonitor<T, dyn BatchStore, P>
    where
        T: StatsSource,
        P: Publisher + ?Sized,
    {
        let allocator = BatchAllocator::from_config(self.state.batches.clone(), &self.config);
        DemandMonitor::new(source, BatchPublisher::new(allocator, publisher))
            .with_poll_interval(self.config.poll_interval())
            .with_retry_policy(self.config.poll_retry_policy())
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        // Add CORS layer if enabled
        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        // Add tracing layer if enabled
        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Serve the API and run the demand monitor until `cancel` fires
    ///
    /// A demand monitor that exhausts its retry budget cancels the token,
    /// stops the HTTP server and is returned as `ServerError::Demand`.
    pub async fn run<T, P>(
        &self,
        source: T,
        publisher: Arc<P>,
        cancel: CancellationToken,
    ) -> Result<(), ServerError>
    where
        T: StatsSource + 'static,
        P: Publisher + ?Sized + 'static,
    {
        let router = self.build_router();

        tracing::info!("Starting Coordinator server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        let monitor = self.demand_monitor(source, publisher);
        let monitor_cancel = cancel.clone();
        let demand = tokio::spawn(async move {
            let result = monitor.run(monitor_cancel.clone()).await;
            if result.is_err() {
                monitor_cancel.cancel();
            }
            result
        });

        let shutdown = cancel.clone();
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()));

        // The HTTP server can only stop through the token; make sure the
        // monitor follows if serve itself failed.
        cancel.cancel();
        let demand = demand
            .await
            .map_err(|e| ServerError::InitError(format!("demand monitor panicked: {e}")))?;

        tracing::info!("Coordinator server shutdown complete");
        served?;
        demand.map_err(ServerError::Demand)
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.addr,
            batch_size: self.config.batch_size,
            poll_interval_secs: self.config.poll_interval_secs,
            cors_enabled: self.config.enable_cors,
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub batch_size: u64,
    pub poll_interval_secs: u64,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Coordinator Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Batch Size: {}\n\
             Poll Interval: {}s\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.batch_size,
            self.poll_interval_secs,
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error
    ConfigError(String),

    /// Initialization error
    InitError(String),

    /// Failed to bind to address
    BindError(String),

    /// Server error
    ServeError(String),

    /// Demand monitor gave up
    Demand(DemandError),
}

impl ServerError {
    /// Whether the demand monitor exhausted its retry budget
    pub fn is_demand_exhausted(&self) -> bool {
        matches!(self, Self::Demand(_))
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::InitError(msg) => write!(f, "Initialization error: {}", msg),
            Self::BindError(msg) => write!(f, "Failed to bind: {}", msg),
            Self::ServeError(msg) => write!(f, "Server error: {}", msg),
            Self::Demand(e) => write!(f, "Demand monitor stopped: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Demand(e) => Some(e),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::nsq::{Stats, StatsError};
    use crate::queue::MemoryPublisher;
    use crate::storage::{MockBatchStore, MockCredentialStore};
    use async_trait::async_trait;
    use std::time::Duration;

    fn server(config: CoordinatorConfig) -> Result<CoordinatorServer, ServerError> {
        CoordinatorServer::new(
            config,
            Arc::new(MockBatchStore::new()),
            Arc::new(MockCredentialStore::new()),
        )
    }

    struct Unreachable;

    #[async_trait]
    impl StatsSource for Unreachable {
        async fn fetch(&self) -> Result<Stats, StatsError> {
            Err(StatsError::Status(503))
        }
    }

    #[test]
    fn test_server_creation() {
        assert!(server(CoordinatorConfig::default()).is_ok());
    }

    #[test]
    fn test_server_info() {
        let config = CoordinatorConfig::builder()
            .batch_size(500)
            .enable_cors(true)
            .build()
            .unwrap();
        let info = server(config).unwrap().info();

        assert_eq!(info.batch_size, 500);
        assert!(info.cors_enabled);
        assert!(info.display().contains("Batch Size: 500"));
    }

    #[test]
    fn test_server_rejects_invalid_config() {
        let config = CoordinatorConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(server(config), Err(ServerError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_demand_monitor_shares_store() {
        let server = server(CoordinatorConfig::default()).unwrap();
        let publisher = Arc::new(MemoryPublisher::new());
        let monitor = server.demand_monitor(Unreachable, publisher.clone());

        monitor.publisher().publish_next().await.unwrap();
        assert_eq!(server.state().batches.summary().unwrap().total, 1);
        assert_eq!(publisher.total(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_demand_exhaustion() {
        let config = CoordinatorConfig::builder()
            .bind_address_str("127.0.0.1:0")
            .unwrap()
            .poll_max_elapsed_secs(0)
            .build()
            .unwrap();
        let server = server(config).unwrap();

        let cancel = CancellationToken::new();
        let publisher = Arc::new(MemoryPublisher::new());
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            server.run(Unreachable, publisher, cancel.clone()),
        )
        .await
        .unwrap();

        assert!(result.unwrap_err().is_demand_exhausted());
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let config = CoordinatorConfig::builder()
            .bind_address_str("127.0.0.1:0")
            .unwrap()
            .build()
            .unwrap();
        let server = server(config).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            server.run(Unreachable, Arc::new(MemoryPublisher::new()), cancel),
        )
        .await
        .unwrap();
        assert!(result.is_ok());
    }
}
