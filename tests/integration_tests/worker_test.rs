//! Worker crawl tests
//!
//! Runs the fetcher and crawl loop against a stubbed Steam Web API:
//! 1. Consecutive batches harvest every record exactly once
//! 2. Transient API failures are retried
//! 3. Catching up with the live edge abandons the attempt
//! 4. Forwarded records land in the record store

use prost::Message as _;
use seqharvest::crawler::{BatchWorker, MatchFetcher, SteamApi};
use seqharvest::models::{Batch, Match};
use seqharvest::queue::{HandlerOutcome, MemoryPublisher, Message, MessageHandler, MessageId, MATCHES_TOPIC};
use seqharvest::storage::{MockRecordStore, RecordStore, StorageHandler};
use seqharvest::utils::error::{CrawlError, FetchError};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{create_test_match, fast_worker_settings, steam_page};

const PAGE_PATH: &str = "/IDOTA2Match_570/GetMatchHistoryBySequenceNum/v001/";
const LIVE_EDGE: u64 = 250;
const PAGE_SIZE: u64 = 100;

/// Serve sequence numbers `0..LIVE_EDGE` in pages of `PAGE_SIZE`
async fn steam_server() -> MockServer {
    let server = MockServer::start().await;
    for cursor in (0..=LIVE_EDGE).step_by(50) {
        let end = (cursor + PAGE_SIZE).min(LIVE_EDGE);
        Mock::given(method("GET"))
            .and(path(PAGE_PATH))
            .and(query_param("start_at_match_seq_num", cursor.to_string()))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(steam_page(cursor..end)))
            .mount(&server)
            .await;
    }
    server
}

fn worker(server: &MockServer, queue: Arc<MemoryPublisher>) -> BatchWorker<MatchFetcher, MemoryPublisher> {
    let api = SteamApi::with_base_url("test-key", &server.uri()).unwrap();
    let fetcher = MatchFetcher::new(api, Duration::from_secs(5)).unwrap();
    BatchWorker::new(Arc::new(fetcher), queue).with_settings(fast_worker_settings())
}

fn forwarded(queue: &MemoryPublisher) -> Vec<Match> {
    queue
        .messages(MATCHES_TOPIC)
        .iter()
        .map(|body| Match::decode(body.as_ref()).unwrap())
        .collect()
}

#[tokio::test]
async fn test_consecutive_batches_harvest_each_record_once() {
    let server = steam_server().await;
    let queue = Arc::new(MemoryPublisher::new());
    let worker = worker(&server, queue.clone());

    let first = worker.crawl(&Batch::new(0, 100)).await.unwrap();
    let second = worker.crawl(&Batch::new(100, 200)).await.unwrap();

    assert_eq!(first.forwarded, 100);
    assert_eq!(first.pages, 2);
    assert_eq!(second.forwarded, 100);

    let seqs: Vec<u64> = forwarded(&queue).iter().map(|m| m.match_seq_num).collect();
    assert_eq!(seqs, (0..200).collect::<Vec<_>>());
    assert_eq!(forwarded(&queue)[42], create_test_match(42));
}

#[tokio::test]
async fn test_transient_api_failures_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PAGE_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(PAGE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(steam_page(10..30)))
        .with_priority(2)
        .mount(&server)
        .await;

    let queue = Arc::new(MemoryPublisher::new());
    let report = worker(&server, queue.clone())
        .crawl(&Batch::new(10, 20))
        .await
        .unwrap();

    assert_eq!(report.forwarded, 10);
    assert_eq!(queue.total(), 10);
}

#[tokio::test]
async fn test_live_edge_abandons_attempt() {
    let server = steam_server().await;
    let queue = Arc::new(MemoryPublisher::new());

    let err = worker(&server, queue.clone())
        .crawl(&Batch::new(200, 300))
        .await
        .unwrap_err();

    match err {
        CrawlError::CaughtUp { cursor, empty_pages } => {
            assert_eq!(cursor, LIVE_EDGE);
            assert_eq!(empty_pages, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    // Records harvested before the edge were still forwarded
    assert_eq!(queue.total(), 50);
}

#[tokio::test]
async fn test_missing_result_is_not_completion() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PAGE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let queue = Arc::new(MemoryPublisher::new());
    let result = worker(&server, queue.clone()).crawl(&Batch::new(0, 10)).await;

    assert!(matches!(result, Err(CrawlError::Fetch(FetchError::MissingResult))));
    assert_eq!(queue.total(), 0);
}

#[tokio::test]
async fn test_forwarded_records_reach_the_store() {
    let server = steam_server().await;
    let queue = Arc::new(MemoryPublisher::new());
    worker(&server, queue.clone())
        .crawl(&Batch::new(0, 100))
        .await
        .unwrap();

    let store = Arc::new(MockRecordStore::new());
    let handler = StorageHandler::new(store.clone());

    for (i, body) in queue.messages(MATCHES_TOPIC).into_iter().enumerate() {
        let mut id = [b'0'; 16];
        id[..8].copy_from_slice(format!("{i:08}").as_bytes());
        let message = Message {
            id: MessageId(id),
            attempts: 1,
            timestamp: 0,
            body,
        };
        assert_eq!(handler.handle(&message).await, HandlerOutcome::Finish);
    }

    assert_eq!(store.count().unwrap(), 100);
    let record = create_test_match(7);
    let stored = store.get(&record.storage_key()).unwrap().unwrap();
    assert_eq!(Match::decode(stored.as_slice()).unwrap(), record);
}
