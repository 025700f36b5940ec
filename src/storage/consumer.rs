//! Storage side of the `matches` topic
//!
//! Each message is a protobuf-encoded [`Match`]. The raw message body is
//! stored under the match id, so a redelivered message overwrites itself.

use async_trait::async_trait;
use prost::Message as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::RecordStore;
use crate::metrics;
use crate::models::Match;
use crate::queue::{HandlerOutcome, Message, MessageHandler};

/// Writes harvested records into a [`RecordStore`]
pub struct StorageHandler<R: ?Sized> {
    store: Arc<R>,
    requeue_delay: Duration,

    /// Give up on a message after this many deliveries (0 = never)
    max_attempts: u16,
}

impl<R: RecordStore + ?Sized> StorageHandler<R> {
    pub fn new(store: Arc<R>) -> Self {
        Self {
            store,
            requeue_delay: Duration::from_secs(5),
            max_attempts: 5,
        }
    }

    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u16) -> Self {
        self.max_attempts = attempts;
        self
    }

    fn give_up(&self, message: &Message) -> bool {
        self.max_attempts > 0 && message.attempts >= self.max_attempts
    }
}

#[async_trait]
impl<R: RecordStore + ?Sized> MessageHandler for StorageHandler<R> {
    async fn handle(&self, message: &Message) -> HandlerOutcome {
        let record = match Match::decode(message.body.as_ref()) {
            Ok(record) => record,
            Err(e) => {
                metrics::record_record_rejected();
                if self.give_up(message) {
                    error!(id = %message.id, attempts = message.attempts, error = %e, "Dropping undecodable record");
                    return HandlerOutcome::Finish;
                }
                warn!(id = %message.id, error = %e, "Failed to decode record");
                return HandlerOutcome::Requeue(self.requeue_delay);
            }
        };

        match self.store.put(&record.storage_key(), &message.body) {
            Ok(()) => {
                metrics::record_record_stored();
                debug!(match_id = record.match_id, seq = record.match_seq_num, "Stored record");
                HandlerOutcome::Finish
            }
            Err(e) => {
                metrics::record_record_rejected();
                error!(match_id = record.match_id, error = %e, "Failed to store record");
                HandlerOutcome::Requeue(self.requeue_delay)
            }
        }
    }
}
