use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use seqharvest::config::Config;
use seqharvest::queue::nsq::{ConnectionConfig, ConsumerConfig, NsqConsumer};
use seqharvest::queue::{MATCHES_TOPIC, STORAGE_CHANNEL};
use seqharvest::storage::{StorageHandler, SqliteRecordStore};

/// Persist harvested records from the `matches` topic
pub async fn store(config: Config, cancel: CancellationToken) -> Result<()> {
    let records = Arc::new(
        SqliteRecordStore::new(&config.storage.records_path)
            .context("Failed to open record store")?,
    );

    let handler = StorageHandler::new(records)
        .with_requeue_delay(config.storage_requeue_delay())
        .with_max_attempts(config.storage.max_attempts);

    let mut consumer_config = ConsumerConfig::new(MATCHES_TOPIC, STORAGE_CHANNEL);
    consumer_config.max_in_flight = 32;
    consumer_config.connection = ConnectionConfig {
        user_agent: seqharvest::utils::user_agent("store"),
        heartbeat_interval: config.heartbeat_interval(),
        auth_secret: config
            .broker
            .auth_secret
            .as_ref()
            .map(|s| s.expose().to_string()),
        ..Default::default()
    };

    println!("Starting storage consumer");
    println!("  Broker: {}", config.broker.tcp_address);
    println!("  Records: {}", config.storage.records_path.display());
    println!("Press Ctrl+C to stop.\n");

    NsqConsumer::new(&config.broker.tcp_address, consumer_config, handler)
        .run(cancel)
        .await
        .context("Storage consumer failed")?;

    println!("Storage consumer stopped.");
    Ok(())
}
