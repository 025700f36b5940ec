//! Work queue abstraction
//!
//! The coordinator and workers talk to the broker through two small traits:
//! [`Publisher`] for enqueueing payloads onto a topic and [`MessageHandler`]
//! for consuming them. Delivery is at-least-once: a handler that returns
//! [`HandlerOutcome::Requeue`] (or never answers because the process died) sees
//! the message again once the broker's visibility timeout elapses.
//!
//! - [`nsq`] - NSQ TCP protocol client (producer, consumer) and stats endpoint
//! - [`memory`] - in-process publisher for tests and dry runs

pub mod memory;
pub mod nsq;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryPublisher;

/// Topic carrying batch descriptors from the coordinator to workers
pub const BATCHES_TOPIC: &str = "batches";

/// Channel workers consume batches from
pub const WORKER_CHANNEL: &str = "worker";

/// Topic carrying harvested records from workers to storage
pub const MATCHES_TOPIC: &str = "matches";

/// Channel the storage consumer reads records from
pub const STORAGE_CHANNEL: &str = "storage";

/// Broker-assigned message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub [u8; 16]);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// A delivered queue message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,

    /// Delivery attempts so far, including this one
    pub attempts: u16,

    /// Broker timestamp in nanoseconds since the epoch
    pub timestamp: i64,

    pub body: Bytes,
}

/// What to tell the broker once a message has been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Acknowledge: remove the message from the queue
    Finish,

    /// Put the message back, to be redelivered after the given delay
    Requeue(Duration),
}

/// Errors raised by queue clients
#[derive(Error, Debug)]
pub enum QueueError {
    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Broker answered with an error frame
    #[error("Broker error: {0}")]
    Broker(String),

    /// Unexpected bytes on the wire
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Broker rejected the auth secret
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Broker closed the connection
    #[error("Connection closed by broker")]
    ConnectionClosed,

    /// IDENTIFY payload could not be serialized or parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    /// Whether reconnecting and trying again might succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed | Self::Broker(_))
    }
}

/// Publishes payloads onto a topic
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one message; returns once the broker acknowledged it
    async fn publish(&self, topic: &str, body: Bytes) -> Result<(), QueueError>;
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    async fn publish(&self, topic: &str, body: Bytes) -> Result<(), QueueError> {
        (**self).publish(topic, body).await
    }
}

/// Handles messages delivered by a consumer
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> HandlerOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_display() {
        let id = MessageId(*b"0a1b2c3d4e5f6789");
        assert_eq!(id.to_string(), "0a1b2c3d4e5f6789");
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(QueueError::ConnectionClosed.is_recoverable());
        assert!(!QueueError::Auth("E_UNAUTHORIZED".to_string()).is_recoverable());
        assert!(!QueueError::Protocol("bad frame".to_string()).is_recoverable());
    }

    #[tokio::test]
    async fn test_arc_publisher_delegates() {
        let inner = Arc::new(MemoryPublisher::new());
        let shared: Arc<dyn Publisher> = inner.clone();
        shared
            .publish(MATCHES_TOPIC, Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(inner.messages(MATCHES_TOPIC).len(), 1);
    }
}
