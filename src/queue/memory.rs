//! In-process publisher
//!
//! Records every published payload per topic so tests can assert on what a
//! component produced without a broker.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{Publisher, QueueError};

/// Publisher that keeps messages in memory
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    topics: Mutex<HashMap<String, Vec<Bytes>>>,
    fail: AtomicBool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail with `ConnectionClosed`
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Messages published to `topic`, in publish order
    pub fn messages(&self, topic: &str) -> Vec<Bytes> {
        self.topics
            .lock()
            .map(|topics| topics.get(topic).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Total messages across all topics
    pub fn total(&self) -> usize {
        self.topics
            .lock()
            .map(|topics| topics.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, topic: &str, body: Bytes) -> Result<(), QueueError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(QueueError::ConnectionClosed);
        }

        let mut topics = self
            .topics
            .lock()
            .map_err(|_| QueueError::Protocol("memory publisher lock poisoned".to_string()))?;
        topics.entry(topic.to_string()).or_default().push(body);
        Ok(())
    }
}
