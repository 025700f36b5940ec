//! nsqd HTTP stats endpoint

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Stats snapshot of one nsqd
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    pub topics: Vec<TopicStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicStats {
    pub topic_name: String,
    pub channels: Vec<ChannelStats>,
    pub depth: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelStats {
    pub channel_name: String,
    pub depth: i64,
    pub deferred_count: i64,
    pub in_flight_count: i64,
    pub clients: Vec<ClientStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientStats {
    pub client_id: String,
    pub ready_count: i64,
    pub in_flight_count: i64,
}

impl Stats {
    /// Spare consumer capacity on a channel
    ///
    /// Sum of the clients' ready counts minus messages already waiting
    /// (`depth + deferred_count`). Zero when the topic or channel is unknown;
    /// negative when the backlog exceeds capacity.
    pub fn combined_ready_count(&self, topic: &str, channel: &str) -> i64 {
        self.topics
            .iter()
            .filter(|t| t.topic_name == topic)
            .flat_map(|t| t.channels.iter())
            .filter(|c| c.channel_name == channel)
            .map(|c| {
                let ready: i64 = c.clients.iter().map(|client| client.ready_count).sum();
                ready - (c.depth + c.deferred_count)
            })
            .sum()
    }
}

/// Older nsqd versions wrap the payload in a status envelope
#[derive(Deserialize)]
#[serde(untagged)]
enum StatsBody {
    Enveloped { data: Stats },
    Bare(Stats),
}

impl StatsBody {
    fn into_stats(self) -> Stats {
        match self {
            StatsBody::Enveloped { data } => data,
            StatsBody::Bare(stats) => stats,
        }
    }
}

/// Parse a stats body in either the enveloped or the bare format
pub fn parse_stats(body: &[u8]) -> Result<Stats, StatsError> {
    Ok(serde_json::from_slice::<StatsBody>(body)?.into_stats())
}

/// Errors fetching stats
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Stats endpoint returned status {0}")]
    Status(u16),

    #[error("Failed to decode stats: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),
}

/// Client for `GET /stats?format=json`
#[derive(Debug, Clone)]
pub struct NsqStatsClient {
    http_client: Client,
    stats_url: Url,
}

impl NsqStatsClient {
    /// `base_url` is the broker's HTTP address, e.g. `http://127.0.0.1:4151`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StatsError> {
        let mut stats_url = Url::parse(base_url)
            .and_then(|u| u.join("stats"))
            .map_err(|e| StatsError::InvalidUrl(format!("{base_url}: {e}")))?;
        stats_url.set_query(Some("format=json"));

        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(crate::utils::user_agent("coordinator"))
            .build()?;

        Ok(Self {
            http_client,
            stats_url,
        })
    }

    pub fn stats_url(&self) -> &Url {
        &self.stats_url
    }

    /// Fetch one snapshot; any non-2xx status is an error
    pub async fn fetch(&self) -> Result<Stats, StatsError> {
        let response = self.http_client.get(self.stats_url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(StatsError::Status(response.status().as_u16()));
        }

        let body = response.bytes().await?;
        parse_stats(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(name: &str, depth: i64, deferred: i64, ready: &[i64]) -> ChannelStats {
        ChannelStats {
            channel_name: name.to_string(),
            depth,
            deferred_count: deferred,
            clients: ready
                .iter()
                .map(|&r| ClientStats {
                    ready_count: r,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn stats(topic: &str, channels: Vec<ChannelStats>) -> Stats {
        Stats {
            topics: vec![TopicStats {
                topic_name: topic.to_string(),
                channels,
                depth: 0,
            }],
        }
    }

    #[test]
    fn test_combined_ready_count() {
        let s = stats("batches", vec![channel("worker", 1, 0, &[1, 1, 1])]);
        assert_eq!(s.combined_ready_count("batches", "worker"), 2);
    }

    #[test]
    fn test_combined_ready_count_negative_backlog() {
        let s = stats("batches", vec![channel("worker", 4, 2, &[1])]);
        assert_eq!(s.combined_ready_count("batches", "worker"), -5);
    }

    #[test]
    fn test_combined_ready_count_unknown_names() {
        let s = stats("batches", vec![channel("worker", 0, 0, &[5])]);
        assert_eq!(s.combined_ready_count("matches", "worker"), 0);
        assert_eq!(s.combined_ready_count("batches", "storage"), 0);
        assert_eq!(Stats::default().combined_ready_count("batches", "worker"), 0);
    }

    #[test]
    fn test_parse_enveloped_body() {
        let body = br#"{
            "status_code": 200,
            "status_txt": "OK",
            "data": {"topics": [{"topic_name": "batches", "channels": [
                {"channel_name": "worker", "depth": 0, "deferred_count": 1,
                 "clients": [{"ready_count": 3}]}
            ]}]}
        }"#;
        let s = parse_stats(body).unwrap();
        assert_eq!(s.combined_ready_count("batches", "worker"), 2);
    }

    #[test]
    fn test_parse_bare_body() {
        let body = br#"{"version": "1.3.0", "health": "OK", "topics": [
            {"topic_name": "batches", "channels": [
                {"channel_name": "worker", "depth": 2, "deferred_count": 0,
                 "clients": [{"ready_count": 1}, {"ready_count": 1}]}
            ]}
        ]}"#;
        let s = parse_stats(body).unwrap();
        assert_eq!(s.combined_ready_count("batches", "worker"), 0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_stats(b"not json").is_err());
    }

    #[test]
    fn test_stats_url() {
        let client = NsqStatsClient::new("http://127.0.0.1:4151", Duration::from_secs(5)).unwrap();
        assert_eq!(client.stats_url().as_str(), "http://127.0.0.1:4151/stats?format=json");
        assert!(NsqStatsClient::new("not a url", Duration::from_secs(5)).is_err());
    }
}
