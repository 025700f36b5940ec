//! Publishing over a lazily established, self-healing connection

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::codec::{is_valid_name, Command};
use super::connection::{ConnectionConfig, NsqConnection};
use crate::queue::{Publisher, QueueError};

/// NSQ producer
///
/// Holds at most one connection. Each publish waits for the broker's `OK`, so a
/// successful return means the message is durable on the broker. Any failure
/// drops the connection and the next publish reconnects.
pub struct NsqProducer {
    addr: String,
    config: ConnectionConfig,
    conn: Mutex<Option<NsqConnection>>,
}

impl NsqProducer {
    pub fn new(addr: impl Into<String>, config: ConnectionConfig) -> Self {
        Self {
            addr: addr.into(),
            config,
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send CLS on the current connection, if any
    pub async fn stop(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "Error closing producer connection");
            }
        }
    }
}

#[async_trait]
impl Publisher for NsqProducer {
    async fn publish(&self, topic: &str, body: Bytes) -> Result<(), QueueError> {
        if !is_valid_name(topic) {
            return Err(QueueError::Protocol(format!("invalid topic name {topic:?}")));
        }

        let mut guard = self.conn.lock().await;

        if guard.is_none() {
            debug!(addr = %self.addr, "Connecting producer");
            *guard = Some(NsqConnection::connect(&self.addr, &self.config).await?);
        }
        let conn = guard.as_mut().ok_or(QueueError::ConnectionClosed)?;

        let result = async {
            conn.send(Command::Pub {
                topic: topic.to_string(),
                body,
            })
            .await?;
            conn.read_response().await.map(|_| ())
        }
        .await;

        if let Err(e) = &result {
            warn!(addr = %self.addr, topic, error = %e, "Publish failed, dropping connection");
            *guard = None;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_invalid_topic_without_connecting() {
        let producer = NsqProducer::new("127.0.0.1:1", ConnectionConfig::default());
        let err = producer
            .publish("not a topic", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_connect_failure_is_recoverable() {
        let config = ConnectionConfig {
            connect_timeout: std::time::Duration::from_millis(200),
            ..Default::default()
        };
        let producer = NsqProducer::new("127.0.0.1:1", config);
        let err = producer
            .publish("matches", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }
}
