use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use seqharvest::config::Config;
use seqharvest::coordinator::{ClientConfig, CoordinatorClient};
use seqharvest::crawler::{BatchWorker, MatchFetcher, SteamApi, WorkerRunner};
use seqharvest::queue::nsq::{ConnectionConfig, ConsumerConfig, NsqConsumer, NsqProducer};
use seqharvest::queue::{BATCHES_TOPIC, WORKER_CHANNEL};

/// Consume batches and harvest them until cancelled
pub async fn worker(config: Config, cancel: CancellationToken) -> Result<()> {
    if config.steam.api_key.is_empty() {
        anyhow::bail!("A Steam API key is required (STEAM_API_KEY)");
    }
    if config.worker.secret.is_empty() {
        tracing::warn!("No worker secret configured; the coordinator will reject progress reports");
    }

    let user_agent = seqharvest::utils::user_agent("worker");

    let api = SteamApi::with_base_url(config.steam.api_key.expose(), &config.steam.base_url)
        .context("Invalid Steam API base URL")?;
    let mut fetcher =
        MatchFetcher::new(api, config.request_timeout()).context("Failed to create fetcher")?;
    if let Some(count) = config.steam.matches_requested {
        fetcher = fetcher.with_matches_requested(count);
    }

    let secret = Some(config.worker.secret.expose().to_string()).filter(|s| !s.is_empty());
    let connection = ConnectionConfig {
        client_id: config.worker.identity.clone(),
        user_agent: user_agent.clone(),
        heartbeat_interval: config.heartbeat_interval(),
        msg_timeout: config.msg_timeout(),
        auth_secret: secret,
        ..Default::default()
    };
    let producer = Arc::new(NsqProducer::new(&config.broker.tcp_address, connection.clone()));

    let client = CoordinatorClient::new(ClientConfig::new(
        &config.worker.coordinator_url,
        &config.worker.identity,
        config.worker.secret.expose(),
    ))
    .context("Failed to create coordinator client")?;

    match client.health_check().await {
        Ok(health) => tracing::info!(
            healthy = health.healthy,
            version = %health.version,
            "Coordinator reachable"
        ),
        Err(e) => tracing::warn!(error = %e, "Coordinator unreachable; progress reports may fail"),
    }

    let batch_worker = BatchWorker::new(Arc::new(fetcher), producer.clone())
        .with_settings(config.worker_settings());
    let runner = WorkerRunner::new(batch_worker)
        .with_reporter(Arc::new(client))
        .with_user_agent(user_agent)
        .with_requeue_delay(config.requeue_delay())
        .with_caught_up_delay(config.caught_up_delay());

    let mut consumer_config = ConsumerConfig::new(BATCHES_TOPIC, WORKER_CHANNEL);
    consumer_config.max_in_flight = 1;
    consumer_config.connection = connection;
    consumer_config.touch_interval = Some(config.touch_interval());

    println!("Starting worker {}", config.worker.identity);
    println!("  Broker: {}", config.broker.tcp_address);
    println!("  Coordinator: {}", config.worker.coordinator_url);
    println!("  Steam API: {}", config.steam.base_url);
    println!("Press Ctrl+C to stop.\n");

    let consumer = NsqConsumer::new(&config.broker.tcp_address, consumer_config, runner);
    let result = consumer.run(cancel).await;
    producer.stop().await;

    result.context("Batch consumer failed")?;
    println!("Worker stopped.");
    Ok(())
}
