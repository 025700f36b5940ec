//! Demand-driven batch production
//!
//! Every poll interval the monitor samples the broker's stats, computes how
//! many more batches the connected workers can take right now and publishes
//! exactly that many. Nothing is produced ahead of demand, so the queue never
//! accumulates a backlog of stale batches.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::publisher::{BatchPublisher, ProductionReport};
use crate::metrics;
use crate::queue::{Publisher, BATCHES_TOPIC, WORKER_CHANNEL};
use crate::storage::BatchStore;
use crate::utils::retry::{with_retry_notify, RetryPolicy};

pub use crate::queue::nsq::stats::{ChannelStats, ClientStats, Stats, StatsError, TopicStats};

/// Source of broker stats snapshots
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch(&self) -> Result<Stats, StatsError>;
}

#[async_trait]
impl StatsSource for crate::queue::nsq::NsqStatsClient {
    async fn fetch(&self) -> Result<Stats, StatsError> {
        crate::queue::nsq::NsqStatsClient::fetch(self).await
    }
}

#[derive(Error, Debug)]
pub enum DemandError {
    /// Stats stayed unavailable for the whole retry budget
    #[error("Broker stats unavailable after {attempts} attempts over {elapsed:?}: {last}")]
    PollExhausted {
        attempts: u32,
        elapsed: Duration,
        #[source]
        last: StatsError,
    },
}

/// Periodically converts spare consumer capacity into new batches
pub struct DemandMonitor<T, S: ?Sized, P: ?Sized> {
    source: T,
    publisher: BatchPublisher<S, P>,
    topic: String,
    channel: String,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl<T, S, P> DemandMonitor<T, S, P>
where
    T: StatsSource,
    S: BatchStore + ?Sized,
    P: Publisher + ?Sized,
{
    pub fn new(source: T, publisher: BatchPublisher<S, P>) -> Self {
        Self {
            source,
            publisher,
            topic: BATCHES_TOPIC.to_string(),
            channel: WORKER_CHANNEL.to_string(),
            poll_interval: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Sample a different topic/channel pair
    pub fn with_target(mut self, topic: impl Into<String>, channel: impl Into<String>) -> Self {
        self.topic = topic.into();
        self.channel = channel.into();
        self
    }

    pub fn publisher(&self) -> &BatchPublisher<S, P> {
        &self.publisher
    }

    /// Fetch stats (with retry), then produce one batch per unit of demand
    pub async fn poll_once(&self) -> Result<ProductionReport, DemandError> {
        let stats = with_retry_notify(
            &self.retry,
            || self.source.fetch(),
            |e, wait| {
                metrics::record_demand_poll_failure();
                warn!(error = %e, ?wait, "Failed retrieving stats, retrying");
            },
        )
        .await
        .map_err(|e| {
            metrics::record_demand_poll_failure();
            DemandError::PollExhausted {
                attempts: e.attempts,
                elapsed: e.elapsed,
                last: e.last_error,
            }
        })?;

        let ready = stats.combined_ready_count(&self.topic, &self.channel);
        metrics::set_demand_ready(ready);

        if ready <= 0 {
            debug!(ready, "No spare consumer capacity");
            return Ok(ProductionReport {
                ready,
                ..Default::default()
            });
        }

        let report = self.publisher.produce(ready).await;
        info!(
            ready = report.ready,
            produced = report.produced,
            failed = report.failed,
            "Production cycle finished"
        );
        Ok(report)
    }

    /// Poll until cancelled
    ///
    /// Returns `Err(PollExhausted)` when a poll's retry budget runs out; the
    /// caller is expected to treat that as fatal.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), DemandError> {
        info!(
            topic = %self.topic,
            channel = %self.channel,
            interval = ?self.poll_interval,
            "Demand monitor started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.poll_once() => {
                    if let Err(e) = result {
                        error!(error = %e, "Demand monitor giving up");
                        return Err(e);
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Demand monitor stopped");
        Ok(())
    }
}
