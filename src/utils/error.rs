//! Error types for the harvesting worker
//!
//! This module defines custom error types used throughout the crawl path.

use thiserror::Error;

use crate::queue::QueueError;

/// Errors that can occur during HTTP fetching operations
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Server answered with a non-success status
    #[error("Server returned status {0}")]
    Status(u16),

    /// Response body could not be decoded
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Response decoded but carried no result envelope
    #[error("Response is missing the result object")]
    MissingResult,

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Retry budget exhausted
    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Whether another attempt might succeed
    ///
    /// Malformed pages fail the attempt at once and rely on queue redelivery.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Self::InvalidUrl(_) | Self::Decode(_) | Self::MissingResult | Self::RetriesExhausted { .. }
        )
    }
}

/// Errors that end one batch attempt
#[derive(Error, Debug)]
pub enum CrawlError {
    /// Queue payload was not a batch descriptor
    #[error("Failed to decode batch: {0}")]
    Decode(#[from] serde_json::Error),

    /// Batch descriptor violates `start < end`
    #[error("Invalid batch range [{start}, {end})")]
    InvalidBatch { start: u64, end: u64 },

    /// Page fetch failed after retries
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Forwarding a record downstream failed
    #[error("Failed to publish record: {0}")]
    Publish(#[from] QueueError),

    /// Source returned only empty pages at the cursor
    #[error("Caught up with the live edge at cursor {cursor} after {empty_pages} empty pages")]
    CaughtUp { cursor: u64, empty_pages: u32 },
}

impl CrawlError {
    /// Whether the batch should be retried later rather than soon
    pub fn is_caught_up(&self) -> bool {
        matches!(self, Self::CaughtUp { .. })
    }
}
