//! Batch crawl loop
//!
//! Walks a batch's sequence range page by page, forwarding every record to
//! the `matches` topic, until the source returns a record at or past the
//! batch end. A batch is never considered done without seeing such a record.

use bytes::Bytes;
use prost::Message as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::fetcher::PageSource;
use crate::metrics;
use crate::models::{Batch, BatchId, MatchHistoryResult};
use crate::queue::{Publisher, MATCHES_TOPIC};
use crate::utils::error::{CrawlError, FetchError};
use crate::utils::retry::{with_retry_if, RetryPolicy};

/// Outcome of a completed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub batch_id: BatchId,

    /// Records published downstream
    pub forwarded: u64,

    /// Pages fetched
    pub pages: u64,

    /// Cursor at the time the end of the batch was reached
    pub last_cursor: u64,
}

/// Tunables for [`BatchWorker`]
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Backoff for failed page fetches
    pub fetch_retry: RetryPolicy,

    /// Pause between successive page fetches
    pub page_delay: Duration,

    /// Consecutive pages without progress before giving up on the attempt
    pub max_empty_pages: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            fetch_retry: RetryPolicy::new(
                Duration::from_secs(1),
                Duration::from_secs(60),
                Duration::from_secs(20 * 60),
            ),
            page_delay: Duration::from_secs(1),
            max_empty_pages: 3,
        }
    }
}

/// Crawls one batch at a time from a [`PageSource`] into a [`Publisher`]
pub struct BatchWorker<S: ?Sized, P: ?Sized> {
    source: Arc<S>,
    publisher: Arc<P>,
    topic: String,
    settings: WorkerSettings,
}

impl<S, P> BatchWorker<S, P>
where
    S: PageSource + ?Sized,
    P: Publisher + ?Sized,
{
    pub fn new(source: Arc<S>, publisher: Arc<P>) -> Self {
        Self {
            source,
            publisher,
            topic: MATCHES_TOPIC.to_string(),
            settings: WorkerSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Publish records to a different topic
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    async fn fetch_with_retry(&self, cursor: u64) -> Result<MatchHistoryResult, FetchError> {
        with_retry_if(
            &self.settings.fetch_retry,
            || self.source.fetch_page(cursor),
            FetchError::is_transient,
            |e, wait| {
                metrics::record_page_fetch_retry();
                warn!(cursor, error = %e, ?wait, "Page fetch failed, retrying");
            },
        )
        .await
        .map_err(|e| {
            if e.permanent {
                e.last_error
            } else {
                FetchError::RetriesExhausted {
                    attempts: e.attempts,
                    last: Box::new(e.last_error),
                }
            }
        })
    }

    /// Crawl `batch` from its start until a record at or past its end is seen
    pub async fn crawl(&self, batch: &Batch) -> Result<BatchReport, CrawlError> {
        if batch.start >= batch.end {
            return Err(CrawlError::InvalidBatch {
                start: batch.start,
                end: batch.end,
            });
        }

        let mut cursor = batch.start;
        let mut forwarded = 0u64;
        let mut pages = 0u64;
        let mut stalled = 0u32;

        loop {
            if pages > 0 && !self.settings.page_delay.is_zero() {
                tokio::time::sleep(self.settings.page_delay).await;
            }

            let page = self.fetch_with_retry(cursor).await?;
            pages += 1;
            metrics::record_page_fetched();

            let before = cursor;
            let mut page_forwarded = 0u64;

            for record in page.matches {
                let seq = record.match_seq_num;
                if seq >= batch.end {
                    metrics::record_records_forwarded(page_forwarded);
                    info!(
                        batch_id = %batch.id,
                        %batch,
                        forwarded = forwarded + page_forwarded,
                        pages,
                        "Reached end of batch"
                    );
                    return Ok(BatchReport {
                        batch_id: batch.id,
                        forwarded: forwarded + page_forwarded,
                        pages,
                        last_cursor: cursor,
                    });
                }

                if seq < cursor {
                    debug!(seq, cursor, "Record below cursor");
                }

                self.publisher
                    .publish(&self.topic, Bytes::from(record.encode_to_vec()))
                    .await?;
                page_forwarded += 1;
                cursor = cursor.max(seq + 1);
            }

            forwarded += page_forwarded;
            metrics::record_records_forwarded(page_forwarded);

            if cursor == before {
                stalled += 1;
                debug!(cursor, stalled, "Page made no progress");
                if stalled >= self.settings.max_empty_pages {
                    return Err(CrawlError::CaughtUp {
                        cursor,
                        empty_pages: stalled,
                    });
                }
            } else {
                stalled = 0;
            }
        }
    }
}
