//! Storage persistence tests
//!
//! Reopens the SQLite stores from disk:
//! 1. Batches and their progress survive a restart
//! 2. Credentials survive a restart and can be rotated
//! 3. Records are keyed by match id and overwritten in place

use chrono::Utc;
use prost::Message as _;
use seqharvest::models::{Batch, Match};
use seqharvest::storage::{
    BatchStore, CredentialStore, RecordStore, SqliteBatchStore, SqliteCredentialStore,
    SqliteRecordStore,
};
use tempfile::TempDir;

use crate::common::create_test_match;

#[test]
fn test_batches_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("batches.db");

    let first = Batch::new(0, 100);
    let second = Batch::new(100, 200);
    {
        let store = SqliteBatchStore::new(&path).unwrap();
        store.insert(&first).unwrap();
        store.insert(&second).unwrap();
        store.record_attempt(&first.id, "worker-1", Some("ua/1")).unwrap();
        assert!(store.close(&first.id, Utc::now()).unwrap());
    }

    let store = SqliteBatchStore::new(&path).unwrap();
    let latest = store.latest().unwrap().unwrap();
    assert_eq!(latest.id, second.id);

    let reloaded = store.get(&first.id).unwrap().unwrap();
    assert_eq!(reloaded.attempts, 1);
    assert_eq!(reloaded.worker.as_deref(), Some("worker-1"));
    assert!(reloaded.is_completed());

    let summary = store.summary().unwrap();
    assert_eq!((summary.total, summary.completed, summary.pending), (2, 1, 1));
    assert_eq!(summary.highest_end, Some(200));
}

#[test]
fn test_duplicate_start_conflicts_on_disk() {
    let dir = TempDir::new().unwrap();
    let store = SqliteBatchStore::new(dir.path().join("batches.db")).unwrap();

    store.insert(&Batch::new(0, 100)).unwrap();
    let err = store.insert(&Batch::new(0, 100)).unwrap_err();
    assert!(err.is_conflict());
}

#[test]
fn test_credentials_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("workers.db");

    {
        let store = SqliteCredentialStore::new(&path).unwrap();
        store.provision("worker-b", "one").unwrap();
        store.provision("worker-a", "two").unwrap();
    }

    let store = SqliteCredentialStore::new(&path).unwrap();
    assert_eq!(store.identities().unwrap(), vec!["worker-a", "worker-b"]);

    let rotated = store.provision("worker-a", "three").unwrap();
    let found = store.find("worker-a").unwrap().unwrap();
    assert_eq!(found.secret_digest, rotated.secret_digest);

    assert!(store.revoke("worker-b").unwrap());
    assert!(store.find("worker-b").unwrap().is_none());
}

#[test]
fn test_records_overwrite_by_match_id() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("records.db");

    let mut record = create_test_match(9);
    {
        let store = SqliteRecordStore::new(&path).unwrap();
        store.put(&record.storage_key(), &record.encode_to_vec()).unwrap();
        record.duration = 2400;
        store.put(&record.storage_key(), &record.encode_to_vec()).unwrap();
    }

    let store = SqliteRecordStore::new(&path).unwrap();
    assert_eq!(store.count().unwrap(), 1);
    let stored = store.get(&record.storage_key()).unwrap().unwrap();
    assert_eq!(Match::decode(stored.as_slice()).unwrap().duration, 2400);
}
