//! Worker credentials
//!
//! Only the SHA-256 digest of each secret is stored.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};

use super::{open_connection, StoreError};
use crate::models::WorkerCredential;

pub trait CredentialStore: Send + Sync {
    /// Look up a worker by identity
    fn find(&self, identity: &str) -> Result<Option<WorkerCredential>, StoreError>;

    /// Store a credential, replacing any existing one for the identity
    fn provision(&self, identity: &str, secret: &str) -> Result<WorkerCredential, StoreError>;

    /// Remove a worker; `true` if it existed
    fn revoke(&self, identity: &str) -> Result<bool, StoreError>;

    /// All known identities, sorted
    fn identities(&self) -> Result<Vec<String>, StoreError>;
}

pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(open_connection(path.as_ref())?),
        };
        store.create_schema()?;
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
                CREATE TABLE IF NOT EXISTS workers (
                    identity TEXT PRIMARY KEY,
                    secret_digest BLOB NOT NULL,
                    created TEXT NOT NULL
                );
                "#,
        )?;
        Ok(())
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn find(&self, identity: &str) -> Result<Option<WorkerCredential>, StoreError> {
        let digest: Option<Vec<u8>> = self
            .conn()?
            .query_row(
                "SELECT secret_digest FROM workers WHERE identity = ?1",
                params![identity],
                |row| row.get(0),
            )
            .optional()?;

        digest
            .map(|bytes| -> Result<WorkerCredential, StoreError> {
                let secret_digest: [u8; 32] =
                    bytes.as_slice().try_into().map_err(|_| StoreError::Corrupt {
                        column: "secret_digest",
                        message: format!("expected 32 bytes, found {}", bytes.len()),
                    })?;
                Ok(WorkerCredential {
                    identity: identity.to_string(),
                    secret_digest,
                })
            })
            .transpose()
    }

    fn provision(&self, identity: &str, secret: &str) -> Result<WorkerCredential, StoreError> {
        let credential = WorkerCredential::from_secret(identity, secret);
        self.conn()?.execute(
            r#"INSERT INTO workers (identity, secret_digest, created) VALUES (?1, ?2, ?3)
               ON CONFLICT(identity) DO UPDATE SET secret_digest = excluded.secret_digest"#,
            params![
                credential.identity,
                credential.secret_digest.as_slice(),
                Utc::now().to_rfc3339()
            ],
        )?;

        tracing::info!(identity, "Worker credential provisioned");
        Ok(credential)
    }

    fn revoke(&self, identity: &str) -> Result<bool, StoreError> {
        let changed = self
            .conn()?
            .execute("DELETE FROM workers WHERE identity = ?1", params![identity])?;
        Ok(changed == 1)
    }

    fn identities(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT identity FROM workers ORDER BY identity")?;
        let identities = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(identities)
    }
}

/// In-memory credential store
#[derive(Debug, Default)]
pub struct MockCredentialStore {
    workers: RwLock<HashMap<String, WorkerCredential>>,
}

impl MockCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `(identity, secret)` pairs
    pub fn with_workers<'a>(workers: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.workers.write() {
            for (identity, secret) in workers {
                map.insert(identity.to_string(), WorkerCredential::from_secret(identity, secret));
            }
        }
        store
    }
}

impl CredentialStore for MockCredentialStore {
    fn find(&self, identity: &str) -> Result<Option<WorkerCredential>, StoreError> {
        let workers = self.workers.read().map_err(|_| StoreError::Poisoned)?;
        Ok(workers.get(identity).cloned())
    }

    fn provision(&self, identity: &str, secret: &str) -> Result<WorkerCredential, StoreError> {
        let credential = WorkerCredential::from_secret(identity, secret);
        self.workers
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .insert(identity.to_string(), credential.clone());
        Ok(credential)
    }

    fn revoke(&self, identity: &str) -> Result<bool, StoreError> {
        Ok(self
            .workers
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .remove(identity)
            .is_some())
    }

    fn identities(&self) -> Result<Vec<String>, StoreError> {
        let mut identities: Vec<String> = self
            .workers
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .keys()
            .cloned()
            .collect();
        identities.sort();
        Ok(identities)
    }
}
