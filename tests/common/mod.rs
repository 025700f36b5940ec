//! Common test utilities

use seqharvest::crawler::WorkerSettings;
use seqharvest::models::Match;
use seqharvest::utils::retry::RetryPolicy;
use serde_json::{json, Value};
use std::time::Duration;

/// Create a match record with default values
pub fn create_test_match(seq: u64) -> Match {
    Match {
        match_id: 5_000_000_000 + seq,
        match_seq_num: seq,
        duration: 1800,
        game_mode: 22,
        radiant_win: seq % 2 == 0,
        start_time: 1_700_000_000 + seq,
        ..Default::default()
    }
}

/// Steam envelope for a page holding `seqs`
pub fn steam_page(seqs: impl IntoIterator<Item = u64>) -> Value {
    let matches: Vec<Match> = seqs.into_iter().map(create_test_match).collect();
    json!({
        "result": {
            "status": 1,
            "matches": matches,
        }
    })
}

/// nsqd stats body for one channel with the given client ready counts
#[allow(dead_code)]
pub fn stats_body(topic: &str, channel: &str, ready: &[i64], depth: i64) -> Value {
    let clients: Vec<Value> = ready
        .iter()
        .enumerate()
        .map(|(i, r)| json!({"client_id": format!("worker-{i}"), "ready_count": r, "in_flight_count": 0}))
        .collect();
    json!({
        "version": "1.3.0",
        "health": "OK",
        "topics": [{
            "topic_name": topic,
            "depth": depth,
            "channels": [{
                "channel_name": channel,
                "depth": depth,
                "deferred_count": 0,
                "in_flight_count": 0,
                "clients": clients,
            }]
        }]
    })
}

/// Retry policy that gives up within milliseconds
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(
        Duration::from_millis(1),
        Duration::from_millis(5),
        Duration::from_millis(200),
    )
    .with_max_retries(3)
}

/// Worker settings without page delays
#[allow(dead_code)]
pub fn fast_worker_settings() -> WorkerSettings {
    WorkerSettings {
        fetch_retry: fast_retry(),
        page_delay: Duration::ZERO,
        max_empty_pages: 2,
    }
}
