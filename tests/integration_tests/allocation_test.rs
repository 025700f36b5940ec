//! Batch allocation tests
//!
//! Verifies that allocated batches tile the sequence space:
//! 1. Sequential allocation is contiguous
//! 2. Concurrent allocators never hand out overlapping ranges
//! 3. Allocation resumes after the latest stored batch

use proptest::prelude::*;
use seqharvest::coordinator::{AllocationError, BatchAllocator};
use seqharvest::models::Batch;
use seqharvest::storage::{BatchStore, MockBatchStore, SqliteBatchStore};
use std::sync::Arc;
use tempfile::TempDir;

fn assert_tiled(mut batches: Vec<Batch>, start_at: u64, batch_size: u64) {
    batches.sort_by_key(|b| b.start);
    let mut expected = start_at;
    for batch in &batches {
        assert_eq!(batch.start, expected, "gap or overlap before {batch}");
        assert_eq!(batch.len(), batch_size);
        expected = batch.end;
    }
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #[test]
    fn prop_sequential_allocation_is_contiguous(
        start_at in 0u64..1_000_000,
        batch_size in 1u64..10_000,
        count in 1usize..40,
    ) {
        let store = Arc::new(MockBatchStore::new());
        let allocator = BatchAllocator::new(store.clone(), batch_size).with_start_at(start_at);

        let batches: Vec<Batch> = (0..count)
            .map(|_| allocator.allocate_next().unwrap())
            .collect();

        prop_assert_eq!(batches[0].start, start_at);
        for pair in batches.windows(2) {
            prop_assert_eq!(pair[0].end, pair[1].start);
        }
        prop_assert_eq!(store.len(), count);
    }

    #[test]
    fn prop_allocation_never_overflows(batch_size in 2u64..1_000) {
        let store = Arc::new(MockBatchStore::new());
        let allocator = BatchAllocator::new(store, batch_size).with_start_at(u64::MAX - batch_size - 1);

        allocator.allocate_next().unwrap();
        let exhausted = matches!(
            allocator.allocate_next(),
            Err(AllocationError::SequenceExhausted { .. })
        );
        prop_assert!(exhausted);
    }
}

// ============================================================================
// SQLite Allocation Tests
// ============================================================================

#[test]
fn test_concurrent_allocation_is_disjoint() {
    let store: Arc<dyn BatchStore> = Arc::new(SqliteBatchStore::in_memory().unwrap());

    let batches: Vec<Batch> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let allocator =
                    BatchAllocator::new(store.clone(), 100).with_max_conflict_retries(1_000);
                scope.spawn(move || {
                    (0..25)
                        .map(|_| allocator.allocate_next().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    assert_eq!(batches.len(), 100);
    assert_tiled(batches, 0, 100);
    assert_eq!(store.summary().unwrap().total, 100);
}

#[test]
fn test_allocation_resumes_after_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("batches.db");

    {
        let store = Arc::new(SqliteBatchStore::new(&path).unwrap());
        let allocator = BatchAllocator::new(store, 50).with_start_at(1_000);
        allocator.allocate_next().unwrap();
        allocator.allocate_next().unwrap();
    }

    let store = Arc::new(SqliteBatchStore::new(&path).unwrap());
    let allocator = BatchAllocator::new(store.clone(), 50).with_start_at(1_000);
    let next = allocator.allocate_next().unwrap();

    assert_eq!((next.start, next.end), (1_100, 1_150));
    assert_eq!(store.summary().unwrap().highest_end, Some(1_150));
}

#[test]
fn test_close_is_idempotent() {
    let store = Arc::new(SqliteBatchStore::in_memory().unwrap());
    let allocator = BatchAllocator::new(store.clone(), 10);
    let batch = allocator.allocate_next().unwrap();

    assert!(allocator.close(&batch).unwrap());
    assert!(!allocator.close(&batch).unwrap());

    let stored = store.get(&batch.id).unwrap().unwrap();
    assert!(stored.is_completed());
    let summary = store.summary().unwrap();
    assert_eq!((summary.completed, summary.pending), (1, 0));
}
