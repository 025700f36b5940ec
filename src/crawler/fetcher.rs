//! Match history page fetcher
//!
//! One call fetches one page of `GetMatchHistoryBySequenceNum` starting at a
//! cursor. The fetcher makes a single attempt; retry and pacing belong to the
//! crawl loop.

use async_trait::async_trait;
use reqwest::{header::ACCEPT, Client};
use std::time::Duration;
use tracing::debug;

use super::api::{ApiArgument, SteamApi, SteamMethod};
use crate::models::{MatchHistoryResponse, MatchHistoryResult};
use crate::utils::error::FetchError;

/// Source of match history pages, ordered by sequence number
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch the page of records whose sequence numbers start at `cursor`
    async fn fetch_page(&self, cursor: u64) -> Result<MatchHistoryResult, FetchError>;
}

/// Fetches pages from the Steam Web API
pub struct MatchFetcher {
    /// HTTP client with configured timeout and compression
    client: Client,

    api: SteamApi,

    /// Optional page size; the API default applies when unset
    matches_requested: Option<u32>,
}

impl MatchFetcher {
    /// Create a fetcher with the given request timeout
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn new(api: SteamApi, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .user_agent(crate::utils::user_agent("worker"))
            .build()?;

        Ok(Self {
            client,
            api,
            matches_requested: None,
        })
    }

    /// Ask for a fixed number of records per page
    pub fn with_matches_requested(mut self, count: u32) -> Self {
        self.matches_requested = Some(count);
        self
    }

    pub fn api(&self) -> &SteamApi {
        &self.api
    }

    async fn fetch_once(&self, cursor: u64) -> Result<MatchHistoryResult, FetchError> {
        let mut arguments = vec![ApiArgument::StartAtMatchSeqNum(cursor)];
        if let Some(count) = self.matches_requested {
            arguments.push(ApiArgument::MatchesRequested(count));
        }
        let url = self
            .api
            .request_url(SteamMethod::GetMatchHistoryBySequenceNum, &arguments)?;

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        let envelope: MatchHistoryResponse =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))?;
        let page = envelope.result.ok_or(FetchError::MissingResult)?;

        debug!(cursor, records = page.matches.len(), "Fetched match history page");
        Ok(page)
    }
}

#[async_trait]
impl PageSource for MatchFetcher {
    async fn fetch_page(&self, cursor: u64) -> Result<MatchHistoryResult, FetchError> {
        self.fetch_once(cursor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE_PATH: &str = "/IDOTA2Match_570/GetMatchHistoryBySequenceNum/v001/";

    async fn fetcher(server: &MockServer) -> MatchFetcher {
        let api = SteamApi::with_base_url("test-key", &server.uri()).unwrap();
        MatchFetcher::new(api, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PAGE_PATH))
            .and(query_param("start_at_match_seq_num", "100"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": {
                    "status": 1,
                    "matches": [
                        {"match_id": 9001, "match_seq_num": 100, "radiant_win": true},
                        {"match_id": 9002, "match_seq_num": 101}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let page = fetcher(&server).await.fetch_page(100).await.unwrap();
        assert_eq!(page.matches.len(), 2);
        assert_eq!(page.matches[0].match_seq_num, 100);
        assert!(page.matches[0].radiant_win);
        assert_eq!(page.matches[1].match_id, 9002);
    }

    #[tokio::test]
    async fn test_matches_requested_argument() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("matches_requested", "25"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": {}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let page = fetcher(&server)
            .await
            .with_matches_requested(25)
            .fetch_page(0)
            .await
            .unwrap();
        assert!(page.matches.is_empty());
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = fetcher(&server).await.fetch_page(0).await.unwrap_err();
        assert!(matches!(err, FetchError::Status(503)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_missing_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = fetcher(&server).await.fetch_page(0).await.unwrap_err();
        assert!(matches!(err, FetchError::MissingResult));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_undecodable_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
            .mount(&server)
            .await;

        let err = fetcher(&server).await.fetch_page(0).await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
        assert!(!err.is_transient());
    }
}
