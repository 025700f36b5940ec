//! seqharvest - Distributed harvester for sequence-numbered match records
//!
//! Walks the Steam Web API's match sequence space in fixed-size batches,
//! spread across any number of workers through an NSQ broker.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`coordinator`] - Batch allocation, demand monitoring and the worker API
//! - [`crawler`] - Steam Web API client and the per-batch crawl loop
//! - [`queue`] - NSQ wire protocol, producer, consumer and stats client
//! - [`storage`] - SQLite-backed batch, credential and record stores
//! - [`models`] - Core data structures and types
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use seqharvest::config::Config;
//! use seqharvest::crawler::{BatchWorker, MatchFetcher, SteamApi};
//! use seqharvest::queue::MemoryPublisher;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let api = SteamApi::new(config.steam.api_key.expose());
//!     let fetcher = MatchFetcher::new(api, config.request_timeout())?;
//!     let _worker = BatchWorker::new(Arc::new(fetcher), Arc::new(MemoryPublisher::new()))
//!         .with_settings(config.worker_settings());
//!     // _worker.crawl(&batch).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod crawler;
pub mod error;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::coordinator::{BatchAllocator, CoordinatorClient, CoordinatorServer};
    pub use crate::crawler::{BatchWorker, MatchFetcher, SteamApi, WorkerRunner};
    pub use crate::error::{Error, ErrorCategory, HarvestErrorTrait, Result};
    pub use crate::models::{Batch, BatchId, Match, MatchHistoryResult};
    pub use crate::queue::{MessageHandler, Publisher};
    pub use crate::storage::{BatchStore, CredentialStore, RecordStore};
}

// Direct re-exports for convenience
pub use models::{Batch, BatchId, Match};
