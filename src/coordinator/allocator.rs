//! Batch allocation
//!
//! Each new batch starts where the most recently created one ended, so the
//! sequence space is covered without gaps or overlaps. Concurrent allocators
//! are serialized by the store's unique index on `start`: the loser of a race
//! gets a conflict, re-reads the latest batch and tries the next range.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::config::CoordinatorConfig;
use crate::metrics;
use crate::models::Batch;
use crate::storage::{BatchStore, StoreError};

/// Errors from allocation and completion
#[derive(Error, Debug)]
pub enum AllocationError {
    #[error("Batch store error: {0}")]
    Store(#[from] StoreError),

    /// Every attempt lost the race for the next range
    #[error("Gave up after {attempts} conflicting inserts (last start {start})")]
    ConflictRetriesExhausted { attempts: u32, start: u64 },

    /// The next batch would run past the end of the sequence space
    #[error("Sequence space exhausted after {start}")]
    SequenceExhausted { start: u64 },
}

/// Compute the range following `latest`
pub fn next_range(
    latest: Option<&Batch>,
    start_at: u64,
    batch_size: u64,
) -> Result<(u64, u64), AllocationError> {
    let start = latest.map_or(start_at, |b| b.end);
    let end = start
        .checked_add(batch_size)
        .ok_or(AllocationError::SequenceExhausted { start })?;
    Ok((start, end))
}

/// Hands out consecutive batches backed by a [`BatchStore`]
pub struct BatchAllocator<S: ?Sized> {
    store: Arc<S>,
    batch_size: u64,
    start_at: u64,
    max_conflict_retries: u32,
}

impl<S: BatchStore + ?Sized> BatchAllocator<S> {
    pub fn new(store: Arc<S>, batch_size: u64) -> Self {
        Self {
            store,
            batch_size,
            start_at: 0,
            max_conflict_retries: 5,
        }
    }

    pub fn from_config(store: Arc<S>, config: &CoordinatorConfig) -> Self {
        Self {
            store,
            batch_size: config.batch_size,
            start_at: config.start_at,
            max_conflict_retries: config.max_conflict_retries,
        }
    }

    /// Offset of the very first batch
    pub fn with_start_at(mut self, start_at: u64) -> Self {
        self.start_at = start_at;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Create and persist the batch following the latest one
    ///
    /// Store read errors propagate; a range is never guessed.
    pub fn allocate_next(&self) -> Result<Batch, AllocationError> {
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let latest = self.store.latest()?;
            match &latest {
                None => info!(start = self.start_at, "Creating first batch"),
                Some(last) => debug!(from = last.end, "Continuing after latest batch"),
            }

            let (start, end) = next_range(latest.as_ref(), self.start_at, self.batch_size)?;
            let batch = Batch::new(start, end);

            match self.store.insert(&batch) {
                Ok(()) => {
                    debug!(batch_id = %batch.id, %batch, "Allocated batch");
                    return Ok(batch);
                }
                Err(e) if e.is_conflict() => {
                    metrics::record_allocation_conflict();
                    if attempts > self.max_conflict_retries {
                        return Err(AllocationError::ConflictRetriesExhausted { attempts, start });
                    }
                    warn!(start, attempts, "Batch start already taken, re-reading latest");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Mark a batch completed; `false` if it already was
    pub fn close(&self, batch: &Batch) -> Result<bool, AllocationError> {
        let closed = self.store.close(&batch.id, Utc::now())?;
        if closed {
            metrics::record_batch_closed();
            info!(batch_id = %batch.id, %batch, "Batch completed");
        } else {
            debug!(batch_id = %batch.id, "Batch already completed");
        }
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BatchId;
    use crate::storage::{BatchSummary, MockBatchStore, SqliteBatchStore};
    use chrono::DateTime;
    use std::sync::atomic::{AtomicU32, Ordering};

    enum Fault {
        /// Another allocator takes the range right before the first insert
        RaceOnce,
        /// Every insert hits the unique index
        AlwaysConflict,
        /// Reading the latest batch fails
        BrokenLatest,
    }

    /// Wraps [`MockBatchStore`] and injects one kind of failure
    struct FaultyStore {
        inner: MockBatchStore,
        fault: Fault,
        inserts: AtomicU32,
    }

    impl FaultyStore {
        fn new(fault: Fault) -> Self {
            Self {
                inner: MockBatchStore::new(),
                fault,
                inserts: AtomicU32::new(0),
            }
        }
    }

    impl BatchStore for FaultyStore {
        fn latest(&self) -> Result<Option<Batch>, StoreError> {
            match self.fault {
                Fault::BrokenLatest => Err(StoreError::Poisoned),
                _ => self.inner.latest(),
            }
        }

        fn insert(&self, batch: &Batch) -> Result<(), StoreError> {
            let n = self.inserts.fetch_add(1, Ordering::SeqCst);
            match self.fault {
                Fault::RaceOnce if n == 0 => {
                    self.inner.insert(&Batch::new(batch.start, batch.end))?;
                    self.inner.insert(batch)
                }
                Fault::AlwaysConflict => Err(StoreError::Conflict(format!("start {} taken", batch.start))),
                _ => self.inner.insert(batch),
            }
        }

        fn close(&self, id: &BatchId, completed_at: DateTime<Utc>) -> Result<bool, StoreError> {
            self.inner.close(id, completed_at)
        }

        fn record_attempt(
            &self,
            id: &BatchId,
            worker: &str,
            user_agent: Option<&str>,
        ) -> Result<Option<Batch>, StoreError> {
            self.inner.record_attempt(id, worker, user_agent)
        }

        fn get(&self, id: &BatchId) -> Result<Option<Batch>, StoreError> {
            self.inner.get(id)
        }

        fn summary(&self) -> Result<BatchSummary, StoreError> {
            self.inner.summary()
        }
    }

    #[test]
    fn test_first_batch_starts_at_offset() {
        let store = Arc::new(MockBatchStore::new());
        let allocator = BatchAllocator::new(store, 100).with_start_at(1_000);
        let batch = allocator.allocate_next().unwrap();
        assert_eq!((batch.start, batch.end), (1_000, 1_100));
    }

    #[test]
    fn test_consecutive_batches_are_contiguous() {
        let store = Arc::new(SqliteBatchStore::in_memory().unwrap());
        let allocator = BatchAllocator::new(store, 100);

        let first = allocator.allocate_next().unwrap();
        let second = allocator.allocate_next().unwrap();

        assert_eq!((first.start, first.end), (0, 100));
        assert_eq!((second.start, second.end), (100, 200));
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_lost_race_moves_to_next_range() {
        let store = Arc::new(FaultyStore::new(Fault::RaceOnce));
        let allocator = BatchAllocator::new(Arc::clone(&store), 100);

        let batch = allocator.allocate_next().unwrap();

        assert_eq!((batch.start, batch.end), (100, 200));
        assert_eq!(store.inserts.load(Ordering::SeqCst), 2);
        let ranges: Vec<_> = store.inner.all().iter().map(|b| (b.start, b.end)).collect();
        assert_eq!(ranges, vec![(0, 100), (100, 200)]);
    }

    #[test]
    fn test_conflict_retries_exhausted() {
        let store = Arc::new(FaultyStore::new(Fault::AlwaysConflict));
        let allocator = BatchAllocator::new(Arc::clone(&store), 100).with_max_conflict_retries(3);

        let err = allocator.allocate_next().unwrap_err();

        assert!(matches!(
            err,
            AllocationError::ConflictRetriesExhausted { attempts: 4, start: 0 }
        ));
        assert_eq!(store.inserts.load(Ordering::SeqCst), 4);
        assert!(store.inner.is_empty());
    }

    #[test]
    fn test_latest_read_error_propagates() {
        let store = Arc::new(FaultyStore::new(Fault::BrokenLatest));
        let allocator = BatchAllocator::new(Arc::clone(&store), 100);

        let err = allocator.allocate_next().unwrap_err();

        assert!(matches!(err, AllocationError::Store(StoreError::Poisoned)));
        assert_eq!(store.inserts.load(Ordering::SeqCst), 0);
        assert!(store.inner.is_empty());
    }

    #[test]
    fn test_next_range_overflow() {
        let last = Batch::new(u64::MAX - 10, u64::MAX - 5);
        let err = next_range(Some(&last), 0, 10).unwrap_err();
        assert!(matches!(err, AllocationError::SequenceExhausted { .. }));
    }

    #[test]
    fn test_close_is_idempotent() {
        let store = Arc::new(MockBatchStore::new());
        let allocator = BatchAllocator::new(Arc::clone(&store), 10);
        let batch = allocator.allocate_next().unwrap();

        assert!(allocator.close(&batch).unwrap());
        let first = store.get(&batch.id).unwrap().unwrap().completed;
        assert!(!allocator.close(&batch).unwrap());
        assert_eq!(store.get(&batch.id).unwrap().unwrap().completed, first);
    }
}
