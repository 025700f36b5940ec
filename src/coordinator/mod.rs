//! Coordinator: batch allocation, demand-driven production and the worker API
//!
//! The coordinator owns the batch store. It watches the broker for spare
//! worker capacity, allocates exactly as many new batches as there is demand
//! and publishes them to the `batches` topic. Workers report attempts and
//! completions back over an authenticated REST API.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │          Coordinator Server          │
//! │                                      │
//! │  ┌────────────────────────────────┐  │
//! │  │        Demand Monitor          │  │
//! │  │  - Poll broker stats           │  │
//! │  │  - Combined ready count        │  │
//! │  │  - Allocate + publish batches  │  │
//! │  └────────────────────────────────┘  │
//! │                                      │
//! │  ┌────────────────────────────────┐  │
//! │  │        REST API                │  │
//! │  │  GET  /api/health              │  │
//! │  │  GET  /metrics                 │  │
//! │  │  GET  /api/batches/summary     │  │
//! │  │  GET  /api/batches/{id}        │  │
//! │  │  POST /api/batches/{id}/attempts│ │
//! │  │  POST /api/batches/{id}/complete│ │
//! │  └────────────────────────────────┘  │
//! └──────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use seqharvest::coordinator::{CoordinatorConfig, CoordinatorServer};
//!
//! let server = CoordinatorServer::new(CoordinatorConfig::default(), batches, credentials)?;
//! server.run(stats_client, producer, cancel).await?;
//! ```

pub mod allocator;
pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod demand;
pub mod publisher;
pub mod server;

// Re-export main types
pub use allocator::{AllocationError, BatchAllocator};
pub use auth::{AuthError, AuthGate, WorkerIdentity};
pub use client::{ClientConfig, ClientError, CoordinatorClient};
pub use config::CoordinatorConfig;
pub use demand::{DemandError, DemandMonitor, StatsSource};
pub use publisher::{BatchPublisher, ProduceError, ProductionReport};
pub use server::{AppState, CoordinatorServer, ServerError};
