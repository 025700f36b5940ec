//! Batch persistence
//!
//! The `batches` table is the single source of truth for which sequence
//! ranges have been handed out. The unique index on `start` is what keeps two
//! concurrent allocators from issuing the same range.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};

use super::{from_sql_u64, open_connection, to_sql_u64, StoreError};
use crate::models::{Batch, BatchId};

/// Totals over all batches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: u64,
    pub completed: u64,
    pub pending: u64,

    /// `end` of the most recently created batch
    pub highest_end: Option<u64>,
}

// ============================================================================
// Store Trait
// ============================================================================

pub trait BatchStore: Send + Sync {
    /// Most recently created batch, ties broken by the higher `start`
    fn latest(&self) -> Result<Option<Batch>, StoreError>;

    /// Insert a new batch; `StoreError::Conflict` if its `start` is taken
    fn insert(&self, batch: &Batch) -> Result<(), StoreError>;

    /// Mark a batch completed unless it already is
    ///
    /// Returns `true` if this call completed the batch, `false` if it was
    /// already completed or does not exist.
    fn close(&self, id: &BatchId, completed_at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Count one delivery attempt and record who made it
    fn record_attempt(
        &self,
        id: &BatchId,
        worker: &str,
        user_agent: Option<&str>,
    ) -> Result<Option<Batch>, StoreError>;

    fn get(&self, id: &BatchId) -> Result<Option<Batch>, StoreError>;

    fn summary(&self) -> Result<BatchSummary, StoreError>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

pub struct SqliteBatchStore {
    conn: Mutex<Connection>,
}

fn format_time(time: &DateTime<Utc>) -> String {
    // Fixed width so that lexicographic order matches time order
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(column: &'static str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            column,
            message: e.to_string(),
        })
}

struct BatchRow {
    id: String,
    start: i64,
    end: i64,
    created: String,
    completed: Option<String>,
    attempts: i64,
    worker: Option<String>,
    user_agent: Option<String>,
}

impl BatchRow {
    const COLUMNS: &'static str = "id, start, \"end\", created, completed, attempts, worker, user_agent";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            start: row.get(1)?,
            end: row.get(2)?,
            created: row.get(3)?,
            completed: row.get(4)?,
            attempts: row.get(5)?,
            worker: row.get(6)?,
            user_agent: row.get(7)?,
        })
    }

    fn into_batch(self) -> Result<Batch, StoreError> {
        Ok(Batch {
            id: self.id.parse().map_err(|e: uuid::Error| StoreError::Corrupt {
                column: "id",
                message: e.to_string(),
            })?,
            start: from_sql_u64("start", self.start)?,
            end: from_sql_u64("end", self.end)?,
            created: parse_time("created", &self.created)?,
            completed: self
                .completed
                .as_deref()
                .map(|c| parse_time("completed", c))
                .transpose()?,
            attempts: from_sql_u64("attempts", self.attempts)?,
            worker: self.worker,
            user_agent: self.user_agent,
        })
    }
}

impl SqliteBatchStore {
    /// Open (or create) the store at `path`
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let store = Self {
            conn: Mutex::new(open_connection(path)?),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "Batch store initialized");
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
                CREATE TABLE IF NOT EXISTS batches (
                    id TEXT PRIMARY KEY,
                    start INTEGER NOT NULL,
                    "end" INTEGER NOT NULL,
                    created TEXT NOT NULL,
                    completed TEXT,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    worker TEXT,
                    user_agent TEXT
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_batches_start
                    ON batches(start);

                CREATE INDEX IF NOT EXISTS idx_batches_created
                    ON batches(created);

                CREATE INDEX IF NOT EXISTS idx_batches_completed
                    ON batches(completed);
                "#,
        )?;
        Ok(())
    }

    fn query_one(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<Batch>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(sql, params, BatchRow::from_row)
            .optional()?;
        row.map(BatchRow::into_batch).transpose()
    }
}

impl BatchStore for SqliteBatchStore {
    fn latest(&self) -> Result<Option<Batch>, StoreError> {
        let sql = format!(
            "SELECT {} FROM batches ORDER BY created DESC, start DESC LIMIT 1",
            BatchRow::COLUMNS
        );
        self.query_one(&sql, [])
    }

    fn insert(&self, batch: &Batch) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO batches (id, start, "end", created, completed, attempts, worker, user_agent)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                batch.id.to_string(),
                to_sql_u64(batch.start)?,
                to_sql_u64(batch.end)?,
                format_time(&batch.created),
                batch.completed.as_ref().map(format_time),
                to_sql_u64(batch.attempts)?,
                batch.worker,
                batch.user_agent,
            ],
        )
        .map_err(StoreError::from_write)?;
        Ok(())
    }

    fn close(&self, id: &BatchId, completed_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE batches SET completed = ?1 WHERE id = ?2 AND completed IS NULL",
            params![format_time(&completed_at), id.to_string()],
        )?;
        Ok(changed == 1)
    }

    fn record_attempt(
        &self,
        id: &BatchId,
        worker: &str,
        user_agent: Option<&str>,
    ) -> Result<Option<Batch>, StoreError> {
        let changed = self.conn()?.execute(
            "UPDATE batches SET attempts = attempts + 1, worker = ?1, user_agent = ?2 WHERE id = ?3",
            params![worker, user_agent, id.to_string()],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get(id)
    }

    fn get(&self, id: &BatchId) -> Result<Option<Batch>, StoreError> {
        let sql = format!("SELECT {} FROM batches WHERE id = ?1", BatchRow::COLUMNS);
        self.query_one(&sql, params![id.to_string()])
    }

    fn summary(&self) -> Result<BatchSummary, StoreError> {
        let (total, completed): (i64, i64) = self.conn()?.query_row(
            "SELECT COUNT(*), COUNT(completed) FROM batches",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let total = from_sql_u64("count", total)?;
        let completed = from_sql_u64("count", completed)?;

        Ok(BatchSummary {
            total,
            completed,
            pending: total - completed,
            highest_end: self.latest()?.map(|b| b.end),
        })
    }
}

// ============================================================================
// Mock Implementation (for testing)
// ============================================================================

/// In-memory batch store with the same constraints as the SQLite one
#[derive(Debug, Default)]
pub struct MockBatchStore {
    batches: RwLock<Vec<Batch>>,
}

impl MockBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all batches in insertion order
    pub fn all(&self) -> Vec<Batch> {
        self.batches.read().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.batches.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BatchStore for MockBatchStore {
    fn latest(&self) -> Result<Option<Batch>, StoreError> {
        let batches = self.batches.read().map_err(|_| StoreError::Poisoned)?;
        Ok(batches
            .iter()
            .max_by(|a, b| a.created.cmp(&b.created).then(a.start.cmp(&b.start)))
            .cloned())
    }

    fn insert(&self, batch: &Batch) -> Result<(), StoreError> {
        let mut batches = self.batches.write().map_err(|_| StoreError::Poisoned)?;
        if batches.iter().any(|b| b.start == batch.start || b.id == batch.id) {
            return Err(StoreError::Conflict(format!("batch starting at {} exists", batch.start)));
        }
        batches.push(batch.clone());
        Ok(())
    }

    fn close(&self, id: &BatchId, completed_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut batches = self.batches.write().map_err(|_| StoreError::Poisoned)?;
        match batches.iter_mut().find(|b| &b.id == id) {
            Some(batch) if batch.completed.is_none() => {
                batch.completed = Some(completed_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn record_attempt(
        &self,
        id: &BatchId,
        worker: &str,
        user_agent: Option<&str>,
    ) -> Result<Option<Batch>, StoreError> {
        let mut batches = self.batches.write().map_err(|_| StoreError::Poisoned)?;
        Ok(batches.iter_mut().find(|b| &b.id == id).map(|batch| {
            batch.attempts += 1;
            batch.worker = Some(worker.to_string());
            batch.user_agent = user_agent.map(String::from);
            batch.clone()
        }))
    }

    fn get(&self, id: &BatchId) -> Result<Option<Batch>, StoreError> {
        let batches = self.batches.read().map_err(|_| StoreError::Poisoned)?;
        Ok(batches.iter().find(|b| &b.id == id).cloned())
    }

    fn summary(&self) -> Result<BatchSummary, StoreError> {
        let total = self.len() as u64;
        let completed = self
            .batches
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .iter()
            .filter(|b| b.is_completed())
            .count() as u64;

        Ok(BatchSummary {
            total,
            completed,
            pending: total - completed,
            highest_end: self.latest()?.map(|b| b.end),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
