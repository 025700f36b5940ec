//! Demand-driven production tests
//!
//! Drives the demand monitor against a stubbed nsqd stats endpoint:
//! 1. Spare capacity turns into published batches
//! 2. Backlog suppresses production
//! 3. A broker that stays unavailable exhausts the poll budget

use seqharvest::coordinator::{BatchAllocator, BatchPublisher, DemandError, DemandMonitor};
use seqharvest::models::Batch;
use seqharvest::queue::nsq::NsqStatsClient;
use seqharvest::queue::{MemoryPublisher, BATCHES_TOPIC, WORKER_CHANNEL};
use seqharvest::storage::{BatchStore, SqliteBatchStore};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{fast_retry, stats_body};

async fn stats_server(body: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stats"))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

fn monitor(
    server: &MockServer,
    store: Arc<SqliteBatchStore>,
    queue: Arc<MemoryPublisher>,
) -> DemandMonitor<NsqStatsClient, SqliteBatchStore, MemoryPublisher> {
    let stats = NsqStatsClient::new(&server.uri(), Duration::from_secs(2)).unwrap();
    let publisher = BatchPublisher::new(BatchAllocator::new(store, 100), queue);
    DemandMonitor::new(stats, publisher).with_retry_policy(fast_retry())
}

fn published(queue: &MemoryPublisher) -> Vec<Batch> {
    queue
        .messages(BATCHES_TOPIC)
        .iter()
        .map(|body| serde_json::from_slice(body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_spare_capacity_produces_batches() {
    // Two clients ready for 2 messages each, one message already waiting
    let server = stats_server(stats_body(BATCHES_TOPIC, WORKER_CHANNEL, &[2, 1], 1)).await;
    let store = Arc::new(SqliteBatchStore::in_memory().unwrap());
    let queue = Arc::new(MemoryPublisher::new());

    let report = monitor(&server, store.clone(), queue.clone())
        .poll_once()
        .await
        .unwrap();

    assert_eq!(report.ready, 2);
    assert_eq!(report.produced, 2);
    assert_eq!(report.failed, 0);

    let batches = published(&queue);
    let ranges: Vec<_> = batches.iter().map(|b| (b.start, b.end)).collect();
    assert_eq!(ranges, vec![(0, 100), (100, 200)]);
    for batch in &batches {
        let stored = store.get(&batch.id).unwrap().unwrap();
        assert_eq!((stored.start, stored.end), (batch.start, batch.end));
    }
}

#[tokio::test]
async fn test_backlog_suppresses_production() {
    let server = stats_server(stats_body(BATCHES_TOPIC, WORKER_CHANNEL, &[1], 4)).await;
    let store = Arc::new(SqliteBatchStore::in_memory().unwrap());
    let queue = Arc::new(MemoryPublisher::new());

    let report = monitor(&server, store.clone(), queue.clone())
        .poll_once()
        .await
        .unwrap();

    assert_eq!(report.ready, -3);
    assert_eq!(report.produced, 0);
    assert_eq!(queue.total(), 0);
    assert_eq!(store.summary().unwrap().total, 0);
}

#[tokio::test]
async fn test_unknown_channel_means_no_demand() {
    let server = stats_server(stats_body("other", "elsewhere", &[10], 0)).await;
    let queue = Arc::new(MemoryPublisher::new());

    let report = monitor(&server, Arc::new(SqliteBatchStore::in_memory().unwrap()), queue.clone())
        .poll_once()
        .await
        .unwrap();

    assert_eq!(report.ready, 0);
    assert_eq!(queue.total(), 0);
}

#[tokio::test]
async fn test_enveloped_stats_are_accepted() {
    let body = serde_json::json!({
        "status_code": 200,
        "status_txt": "OK",
        "data": stats_body(BATCHES_TOPIC, WORKER_CHANNEL, &[1], 0),
    });
    let server = stats_server(body).await;
    let queue = Arc::new(MemoryPublisher::new());

    let report = monitor(&server, Arc::new(SqliteBatchStore::in_memory().unwrap()), queue.clone())
        .poll_once()
        .await
        .unwrap();

    assert_eq!(report.produced, 1);
}

#[tokio::test]
async fn test_unavailable_broker_exhausts_poll_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stats"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let queue = Arc::new(MemoryPublisher::new());

    let err = monitor(&server, Arc::new(SqliteBatchStore::in_memory().unwrap()), queue.clone())
        .poll_once()
        .await
        .unwrap_err();

    let DemandError::PollExhausted { attempts, .. } = err;
    assert!(attempts >= 1);
    assert_eq!(queue.total(), 0);
}

#[tokio::test]
async fn test_publish_failure_is_retried_before_new_allocation() {
    let server = stats_server(stats_body(BATCHES_TOPIC, WORKER_CHANNEL, &[1], 0)).await;
    let store = Arc::new(SqliteBatchStore::in_memory().unwrap());
    let queue = Arc::new(MemoryPublisher::new());
    let monitor = monitor(&server, store.clone(), queue.clone());

    queue.set_failing(true);
    let report = monitor.poll_once().await.unwrap();
    assert_eq!((report.produced, report.failed), (0, 1));
    assert_eq!(monitor.publisher().unpublished_count(), 1);

    queue.set_failing(false);
    let report = monitor.poll_once().await.unwrap();
    assert_eq!(report.produced, 1);

    // The stored batch was published instead of allocating a second one
    let batches = published(&queue);
    assert_eq!(batches.len(), 1);
    assert_eq!((batches[0].start, batches[0].end), (0, 100));
    assert_eq!(store.summary().unwrap().total, 1);
}

#[tokio::test]
async fn test_monitor_can_sample_another_channel() {
    let server = stats_server(stats_body("backfill", "worker", &[1], 0)).await;
    let queue = Arc::new(MemoryPublisher::new());

    let report = monitor(&server, Arc::new(SqliteBatchStore::in_memory().unwrap()), queue.clone())
        .with_target("backfill", "worker")
        .poll_once()
        .await
        .unwrap();

    assert_eq!(report.produced, 1);
    // Batches still go to the batches topic
    assert_eq!(queue.messages(BATCHES_TOPIC).len(), 1);
}
