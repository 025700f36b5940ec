//! Unified error handling for the seqharvest crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while maintaining the ability to use
//! domain-specific errors when needed.
//!
//! # Architecture
//!
//! - [`HarvestErrorTrait`] - Common interface implemented by the domain errors
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use seqharvest::error::{Error, HarvestErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = %err.category(), "Retrying: {err}");
//!     } else {
//!         tracing::error!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::coordinator::{AllocationError, AuthError, ClientError, DemandError};
pub use crate::queue::QueueError;
pub use crate::storage::StoreError;
pub use crate::utils::error::{CrawlError, FetchError};

/// Common trait for all seqharvest error types
pub trait HarvestErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// HTTP, timeouts, unreachable services
    Network,
    /// Undecodable payloads
    Decode,
    /// Database and I/O errors
    Storage,
    /// Rejected credentials
    Auth,
    /// Broker protocol and publishing errors
    Queue,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Decode => "decode",
            Self::Storage => "storage",
            Self::Auth => "auth",
            Self::Queue => "queue",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl HarvestErrorTrait for FetchError {
    fn is_recoverable(&self) -> bool {
        self.is_transient()
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Decode(_) | Self::MissingResult => ErrorCategory::Decode,
            Self::InvalidUrl(_) => ErrorCategory::Config,
            Self::RetriesExhausted { last, .. } => last.category(),
            _ => ErrorCategory::Network,
        }
    }
}

impl HarvestErrorTrait for QueueError {
    fn is_recoverable(&self) -> bool {
        QueueError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Auth(_) => ErrorCategory::Auth,
            Self::Json(_) => ErrorCategory::Decode,
            _ => ErrorCategory::Queue,
        }
    }
}

impl HarvestErrorTrait for CrawlError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Decode(_) | Self::InvalidBatch { .. } => false,
            Self::Fetch(e) => e.is_recoverable() || matches!(e, FetchError::RetriesExhausted { .. }),
            Self::Publish(e) => HarvestErrorTrait::is_recoverable(e),
            Self::CaughtUp { .. } => true,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Decode(_) | Self::InvalidBatch { .. } => ErrorCategory::Decode,
            Self::Fetch(e) => e.category(),
            Self::Publish(e) => e.category(),
            Self::CaughtUp { .. } => ErrorCategory::Other,
        }
    }
}

impl HarvestErrorTrait for StoreError {
    fn is_recoverable(&self) -> bool {
        self.is_conflict()
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }
}

/// Unified error type for the seqharvest crate
///
/// This enum wraps all domain-specific errors, providing a single error type
/// that can be used across module boundaries while preserving the detailed
/// error information.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),

    #[error("Demand error: {0}")]
    Demand(#[from] DemandError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Crawl error: {0}")]
    Crawl(#[from] CrawlError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Coordinator client error: {0}")]
    Client(#[from] ClientError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl HarvestErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_recoverable(),
            Self::Allocation(e) => matches!(e, AllocationError::ConflictRetriesExhausted { .. }),
            Self::Demand(_) => false,
            Self::Auth(e) => matches!(e, AuthError::Store(_)),
            Self::Fetch(e) => e.is_recoverable(),
            Self::Crawl(e) => e.is_recoverable(),
            Self::Queue(e) => HarvestErrorTrait::is_recoverable(e),
            Self::Client(e) => !matches!(
                e,
                ClientError::InitError(_) | ClientError::HttpError { status: 400..=499, .. }
            ),
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(_) | Self::Allocation(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Demand(_) | Self::Client(_) => ErrorCategory::Network,
            Self::Auth(AuthError::Store(_)) => ErrorCategory::Storage,
            Self::Auth(_) => ErrorCategory::Auth,
            Self::Fetch(e) => e.category(),
            Self::Crawl(e) => e.category(),
            Self::Queue(e) => e.category(),
            Self::Json(_) => ErrorCategory::Decode,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
