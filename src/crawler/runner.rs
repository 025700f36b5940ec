//! Glue between the `batches` queue and the crawl loop
//!
//! Each delivered message carries one JSON batch descriptor. The runner
//! crawls it and tells the broker to finish or requeue the message. Progress
//! reports to the coordinator are best effort: a coordinator outage never
//! fails a batch.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::fetcher::PageSource;
use super::worker::BatchWorker;
use crate::coordinator::{ClientError, CoordinatorClient};
use crate::error::HarvestErrorTrait;
use crate::metrics;
use crate::models::Batch;
use crate::queue::{HandlerOutcome, Message, MessageHandler, Publisher};
use crate::utils::error::CrawlError;

/// Receives batch progress from a worker
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// A worker picked the batch up
    async fn attempt(&self, batch: &Batch, user_agent: &str) -> Result<(), ClientError>;

    /// A worker finished the batch; `false` if it was already completed
    async fn completed(&self, batch: &Batch) -> Result<bool, ClientError>;
}

#[async_trait]
impl ProgressReporter for CoordinatorClient {
    async fn attempt(&self, batch: &Batch, user_agent: &str) -> Result<(), ClientError> {
        self.report_attempt(&batch.id, user_agent).await.map(|_| ())
    }

    async fn completed(&self, batch: &Batch) -> Result<bool, ClientError> {
        self.report_completion(&batch.id).await
    }
}

/// Consumes batch descriptors and crawls them
pub struct WorkerRunner<S: ?Sized, P: ?Sized> {
    worker: BatchWorker<S, P>,
    reporter: Option<Arc<dyn ProgressReporter>>,
    user_agent: String,

    /// Requeue delay after a failed attempt (zero leaves it to the broker)
    requeue_delay: Duration,

    /// Requeue delay after catching up with the live edge
    caught_up_delay: Duration,
}

impl<S, P> WorkerRunner<S, P>
where
    S: PageSource + ?Sized,
    P: Publisher + ?Sized,
{
    pub fn new(worker: BatchWorker<S, P>) -> Self {
        Self {
            worker,
            reporter: None,
            user_agent: crate::utils::user_agent("worker"),
            requeue_delay: Duration::ZERO,
            caught_up_delay: Duration::from_secs(10 * 60),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    pub fn with_caught_up_delay(mut self, delay: Duration) -> Self {
        self.caught_up_delay = delay;
        self
    }

    pub fn worker(&self) -> &BatchWorker<S, P> {
        &self.worker
    }

    async fn report_attempt(&self, batch: &Batch) {
        if let Some(reporter) = &self.reporter {
            if let Err(e) = reporter.attempt(batch, &self.user_agent).await {
                warn!(batch_id = %batch.id, error = %e, "Failed to report batch attempt");
            }
        }
    }

    async fn report_completion(&self, batch: &Batch) {
        let Some(reporter) = &self.reporter else {
            return;
        };

        match reporter.completed(batch).await {
            Ok(true) => debug!(batch_id = %batch.id, "Completion recorded"),
            Ok(false) => info!(batch_id = %batch.id, "Batch was already completed"),
            Err(e) => warn!(batch_id = %batch.id, error = %e, "Failed to report batch completion"),
        }
    }
}

#[async_trait]
impl<S, P> MessageHandler for WorkerRunner<S, P>
where
    S: PageSource + ?Sized,
    P: Publisher + ?Sized,
{
    async fn handle(&self, message: &Message) -> HandlerOutcome {
        let started = Instant::now();

        let batch: Batch = match serde_json::from_slice(&message.body) {
            Ok(batch) => batch,
            Err(e) => {
                let err = CrawlError::from(e);
                error!(id = %message.id, error = %err, "Rejecting message");
                metrics::record_batch_outcome("failed", started.elapsed().as_secs_f64());
                return HandlerOutcome::Requeue(self.requeue_delay);
            }
        };

        info!(
            batch_id = %batch.id,
            %batch,
            attempts = message.attempts,
            "Processing batch"
        );
        self.report_attempt(&batch).await;

        match self.worker.crawl(&batch).await {
            Ok(report) => {
                info!(
                    batch_id = %report.batch_id,
                    forwarded = report.forwarded,
                    pages = report.pages,
                    elapsed = ?started.elapsed(),
                    "Batch finished"
                );
                self.report_completion(&batch).await;
                metrics::record_batch_outcome("succeeded", started.elapsed().as_secs_f64());
                HandlerOutcome::Finish
            }
            Err(e) if e.is_caught_up() => {
                info!(batch_id = %batch.id, error = %e, delay = ?self.caught_up_delay, "Requeueing batch");
                metrics::record_batch_outcome("caught_up", started.elapsed().as_secs_f64());
                HandlerOutcome::Requeue(self.caught_up_delay)
            }
            Err(e) => {
                error!(
                    batch_id = %batch.id,
                    error = %e,
                    category = %e.category(),
                    recoverable = e.is_recoverable(),
                    "Batch attempt failed"
                );
                metrics::record_batch_outcome("failed", started.elapsed().as_secs_f64());
                HandlerOutcome::Requeue(self.requeue_delay)
            }
        }
    }
}
