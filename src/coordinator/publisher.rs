//! Batch publishing
//!
//! Allocates batches and enqueues their JSON descriptors on the `batches`
//! topic. A batch that was stored but could not be published is kept and
//! published before any new allocation, so a broker hiccup never leaves a
//! hole in the harvested range.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, error, info};

use super::allocator::{AllocationError, BatchAllocator};
use crate::metrics;
use crate::models::Batch;
use crate::queue::{Publisher, QueueError, BATCHES_TOPIC};
use crate::storage::BatchStore;

#[derive(Error, Debug)]
pub enum ProduceError {
    #[error("Allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    #[error("Failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to publish batch {batch}: {source}")]
    Publish {
        batch: String,
        #[source]
        source: QueueError,
    },
}

/// Outcome of one production round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionReport {
    /// Combined ready count that triggered the round
    pub ready: i64,
    pub produced: u64,
    pub failed: u64,
}

pub struct BatchPublisher<S: ?Sized, P: ?Sized> {
    allocator: BatchAllocator<S>,
    publisher: Arc<P>,
    topic: String,
    unpublished: Mutex<VecDeque<Batch>>,
}

impl<S, P> BatchPublisher<S, P>
where
    S: BatchStore + ?Sized,
    P: Publisher + ?Sized,
{
    pub fn new(allocator: BatchAllocator<S>, publisher: Arc<P>) -> Self {
        Self {
            allocator,
            publisher,
            topic: BATCHES_TOPIC.to_string(),
            unpublished: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn allocator(&self) -> &BatchAllocator<S> {
        &self.allocator
    }

    /// Batches stored but still waiting to be published
    pub fn unpublished_count(&self) -> usize {
        self.unpublished().len()
    }

    fn unpublished(&self) -> MutexGuard<'_, VecDeque<Batch>> {
        // Only holds plain data, so a poisoned guard is still consistent
        self.unpublished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish one batch: a previously unpublished one, else a new allocation
    pub async fn publish_next(&self) -> Result<Batch, ProduceError> {
        let pending = self.unpublished().pop_front();
        let batch = match pending {
            Some(batch) => {
                debug!(batch_id = %batch.id, "Retrying unpublished batch");
                batch
            }
            None => self.allocator.allocate_next()?,
        };

        let body = match serde_json::to_vec(&batch) {
            Ok(body) => body,
            Err(e) => {
                self.unpublished().push_front(batch);
                return Err(e.into());
            }
        };

        if let Err(source) = self.publisher.publish(&self.topic, Bytes::from(body)).await {
            let id = batch.id.to_string();
            self.unpublished().push_front(batch);
            return Err(ProduceError::Publish { batch: id, source });
        }

        info!(batch_id = %batch.id, start = batch.start, end = batch.end, "Published batch");
        Ok(batch)
    }

    /// Publish one batch per unit of positive `ready`
    ///
    /// Individual failures are logged and counted; they never stop the round.
    pub async fn produce(&self, ready: i64) -> ProductionReport {
        let mut report = ProductionReport {
            ready,
            ..Default::default()
        };

        for _ in 0..ready.max(0) {
            match self.publish_next().await {
                Ok(_) => {
                    report.produced += 1;
                    metrics::record_batch_allocated();
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::record_allocation_failure();
                    error!(error = %e, "Failed to produce batch");
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryPublisher;
    use crate::storage::MockBatchStore;

    fn publisher(
        store: Arc<MockBatchStore>,
        queue: Arc<MemoryPublisher>,
    ) -> BatchPublisher<MockBatchStore, MemoryPublisher> {
        BatchPublisher::new(BatchAllocator::new(store, 100), queue)
    }

    #[tokio::test]
    async fn test_produce_publishes_json_batches() {
        let store = Arc::new(MockBatchStore::new());
        let queue = Arc::new(MemoryPublisher::new());
        let report = publisher(Arc::clone(&store), Arc::clone(&queue))
            .produce(2)
            .await;

        assert_eq!(report, ProductionReport { ready: 2, produced: 2, failed: 0 });
        let published: Vec<Batch> = queue
            .messages(BATCHES_TOPIC)
            .iter()
            .map(|b| serde_json::from_slice(b).unwrap())
            .collect();
        assert_eq!(published.len(), 2);
        assert_eq!((published[0].start, published[0].end), (0, 100));
        assert_eq!((published[1].start, published[1].end), (100, 200));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_non_positive_ready_produces_nothing() {
        let store = Arc::new(MockBatchStore::new());
        let queue = Arc::new(MemoryPublisher::new());
        let p = publisher(Arc::clone(&store), Arc::clone(&queue));

        assert_eq!(p.produce(0).await.produced, 0);
        assert_eq!(p.produce(-4).await.produced, 0);
        assert!(store.is_empty());
        assert_eq!(queue.total(), 0);
    }

    #[tokio::test]
    async fn test_unpublished_batch_is_retried_before_new_allocation() {
        let store = Arc::new(MockBatchStore::new());
        let queue = Arc::new(MemoryPublisher::new());
        let p = publisher(Arc::clone(&store), Arc::clone(&queue));

        queue.set_failing(true);
        let report = p.produce(1).await;
        assert_eq!(report.failed, 1);
        assert_eq!(p.unpublished_count(), 1);
        assert_eq!(store.len(), 1);

        queue.set_failing(false);
        let batch = p.publish_next().await.unwrap();
        assert_eq!(batch.start, 0);
        assert_eq!(store.len(), 1);
        assert_eq!(p.unpublished_count(), 0);
    }
}
