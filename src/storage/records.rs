//! Keyed record storage
//!
//! A plain key/value table. Writes overwrite, so replaying a redelivered
//! record is harmless.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};

use super::{from_sql_u64, open_connection, StoreError};

pub trait RecordStore: Send + Sync {
    /// Insert or overwrite the value stored under `key`
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn count(&self) -> Result<u64, StoreError>;
}

pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let store = Self {
            conn: Mutex::new(open_connection(path)?),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "Record store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn create_schema(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS records (
                    key BLOB PRIMARY KEY,
                    value BLOB NOT NULL,
                    updated TEXT NOT NULL
                );
                "#,
        )?;
        Ok(())
    }
}

impl RecordStore for SqliteRecordStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.conn()?.execute(
            r#"INSERT INTO records (key, value, updated) VALUES (?1, ?2, ?3)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated = excluded.updated"#,
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT value FROM records WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        from_sql_u64("count", count)
    }
}

/// In-memory record store
#[derive(Debug, Default)]
pub struct MockRecordStore {
    records: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MockRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys in ascending order
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.records
            .read()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl RecordStore for MockRecordStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.records
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .records
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .get(key)
            .cloned())
    }

    fn count(&self) -> Result<u64, StoreError> {
        Ok(self.records.read().map_err(|_| StoreError::Poisoned)?.len() as u64)
    }
}
