use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use seqharvest::config::{Config, Secret};
use seqharvest::coordinator::CoordinatorServer;
use seqharvest::queue::nsq::{ConnectionConfig, NsqProducer, NsqStatsClient};
use seqharvest::storage::{BatchStore, CredentialStore, SqliteBatchStore, SqliteCredentialStore};

/// Start the coordinator: worker API plus demand monitor
pub async fn coordinator(config: Config, cancel: CancellationToken) -> Result<()> {
    let batches: Arc<dyn BatchStore> = Arc::new(
        SqliteBatchStore::new(&config.storage.batches_path).context("Failed to open batch store")?,
    );
    let credentials: Arc<dyn CredentialStore> = Arc::new(
        SqliteCredentialStore::new(&config.storage.credentials_path)
            .context("Failed to open credential store")?,
    );

    let stats = NsqStatsClient::new(&config.broker.http_address, config.coordinator.stats_timeout())
        .context("Failed to create broker stats client")?;

    let connection = ConnectionConfig {
        user_agent: seqharvest::utils::user_agent("coordinator"),
        heartbeat_interval: config.heartbeat_interval(),
        auth_secret: config
            .broker
            .auth_secret
            .as_ref()
            .map(|s| s.expose().to_string()),
        ..Default::default()
    };
    let producer = Arc::new(NsqProducer::new(&config.broker.tcp_address, connection));

    let server = CoordinatorServer::new(config.coordinator.clone(), batches, credentials)
        .context("Failed to create coordinator server")?;

    println!("{}", server.info().display());
    println!();
    println!("API Endpoints:");
    println!("  GET  /api/health                   - Health check");
    println!("  GET  /metrics                      - Prometheus metrics endpoint");
    println!("  GET  /api/batches/summary          - Batch counts");
    println!("  GET  /api/batches/{{id}}             - Get batch by ID");
    println!("  POST /api/batches/{{id}}/attempts    - Report a batch attempt");
    println!("  POST /api/batches/{{id}}/complete    - Report batch completion");
    println!();
    println!(
        "Broker: {} (stats {}, secret {})",
        config.broker.tcp_address,
        stats.stats_url(),
        seqharvest::utils::mask_secret(config.broker.auth_secret.as_ref().map_or("", Secret::expose)),
    );
    println!("Press Ctrl+C to stop.\n");

    let result = server.run(stats, producer.clone(), cancel).await;
    producer.stop().await;

    match result {
        Err(e) if e.is_demand_exhausted() => {
            Err(e).context("Broker stats stayed unavailable; coordinator stopped")
        }
        other => {
            other.context("Coordinator server failed")?;
            println!("Coordinator server stopped.");
            Ok(())
        }
    }
}
