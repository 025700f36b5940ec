//! Persistence for batches, worker credentials and harvested records
//!
//! Every store is a trait with a SQLite implementation and an in-memory mock,
//! so components can be tested without a database file.
//!
//! ```text
//! ┌──────────────┐  ┌──────────────────┐  ┌──────────────┐
//! │  BatchStore  │  │ CredentialStore  │  │ RecordStore  │
//! └──────┬───────┘  └────────┬─────────┘  └──────┬───────┘
//!        │                   │                   │
//!   ┌────┴────┐         ┌────┴────┐         ┌────┴────┐
//!   │ SQLite  │ Mock    │ SQLite  │ Mock    │ SQLite  │ Mock
//!   └─────────┘         └─────────┘         └─────────┘
//! ```

pub mod batch;
pub mod consumer;
pub mod credentials;
pub mod records;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

pub use batch::{BatchStore, BatchSummary, MockBatchStore, SqliteBatchStore};
pub use consumer::StorageHandler;
pub use credentials::{CredentialStore, MockCredentialStore, SqliteCredentialStore};
pub use records::{MockRecordStore, RecordStore, SqliteRecordStore};

/// Errors raised by the stores
#[derive(Error, Debug)]
pub enum StoreError {
    /// A unique constraint rejected the write
    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value cannot be represented in the domain type
    #[error("Corrupt value in column {column}: {message}")]
    Corrupt { column: &'static str, message: String },

    /// Value does not fit the storage column
    #[error("Value {0} is out of range for storage")]
    OutOfRange(u64),

    #[error("Store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Map unique and primary key violations to `Conflict`
    pub(crate) fn from_write(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, message)
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                Self::Conflict(message.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => Self::Sqlite(err),
        }
    }
}

/// Open a SQLite file in WAL mode, creating parent directories
pub(crate) fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}

pub(crate) fn to_sql_u64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::OutOfRange(value))
}

pub(crate) fn from_sql_u64(column: &'static str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt {
        column,
        message: format!("negative value {value}"),
    })
}
