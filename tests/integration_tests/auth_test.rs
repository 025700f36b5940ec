//! Coordinator API tests over a real socket
//!
//! Tests the interaction between a worker's coordinator client and the API:
//! 1. Provisioned workers report attempts and completions
//! 2. Wrong or unknown credentials are rejected without side effects
//! 3. Health stays public

use seqharvest::coordinator::{AppState, ClientConfig, CoordinatorClient, CoordinatorConfig, CoordinatorServer};
use seqharvest::models::Batch;
use seqharvest::storage::{BatchStore, CredentialStore, SqliteBatchStore, SqliteCredentialStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const IDENTITY: &str = "worker-1";
const SECRET: &str = "correct horse battery staple";

/// Serve the coordinator API on an ephemeral port
async fn spawn_coordinator() -> (String, AppState) {
    let config = CoordinatorConfig::builder().batch_size(100).build().unwrap();
    let batches: Arc<dyn BatchStore> = Arc::new(SqliteBatchStore::in_memory().unwrap());
    let credentials = SqliteCredentialStore::in_memory().unwrap();
    credentials.provision(IDENTITY, SECRET).unwrap();
    let credentials: Arc<dyn CredentialStore> = Arc::new(credentials);

    let server = CoordinatorServer::new(config, batches, credentials).unwrap();
    let state = server.state();
    let router = server.build_router();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{addr}"), state)
}

fn client(url: &str, identity: &str, secret: &str) -> CoordinatorClient {
    let config = ClientConfig::new(url, identity, secret)
        .with_retry_count(1)
        .with_retry_delay(Duration::from_millis(10));
    CoordinatorClient::new(config).unwrap()
}

fn allocate(state: &AppState) -> Batch {
    state.allocator.allocate_next().unwrap()
}

// ============================================================================
// Authorized Worker Tests
// ============================================================================

#[tokio::test]
async fn test_worker_reports_attempt_and_completion() {
    let (url, state) = spawn_coordinator().await;
    let batch = allocate(&state);
    let client = client(&url, IDENTITY, SECRET);

    let updated = client.report_attempt(&batch.id, "seqharvest-test/1.0").await.unwrap();
    assert_eq!(updated.attempts, 1);
    assert_eq!(updated.worker.as_deref(), Some(IDENTITY));
    assert_eq!(updated.user_agent.as_deref(), Some("seqharvest-test/1.0"));

    assert!(client.report_completion(&batch.id).await.unwrap());
    assert!(!client.report_completion(&batch.id).await.unwrap());

    let stored = assert_ok!(client.get_batch(&batch.id).await);
    assert!(stored.is_completed());

    let summary = client.summary().await.unwrap();
    assert_eq!((summary.total, summary.completed, summary.pending), (1, 1, 0));
}

#[tokio::test]
async fn test_unknown_batch_is_not_found() {
    let (url, _state) = spawn_coordinator().await;
    let client = client(&url, IDENTITY, SECRET);

    let err = client
        .report_completion(&Batch::new(0, 1).id)
        .await
        .unwrap_err();
    assert!(matches!(err, seqharvest::coordinator::ClientError::HttpError { status: 404, .. }));
}

// ============================================================================
// Rejected Credential Tests
// ============================================================================

#[tokio::test]
async fn test_wrong_secret_is_rejected() {
    let (url, state) = spawn_coordinator().await;
    let batch = allocate(&state);
    let client = client(&url, IDENTITY, "guess");

    let err = assert_err!(client.report_attempt(&batch.id, "ua").await);
    assert!(err.is_unauthorized());

    let err = assert_err!(client.report_completion(&batch.id).await);
    assert!(err.is_unauthorized());

    // Nothing was recorded
    let stored = state.batches.get(&batch.id).unwrap().unwrap();
    assert_eq!(stored.attempts, 0);
    assert!(!stored.is_completed());
}

#[tokio::test]
async fn test_unknown_worker_is_rejected() {
    let (url, state) = spawn_coordinator().await;
    let batch = allocate(&state);

    let err = client(&url, "intruder", SECRET)
        .report_attempt(&batch.id, "ua")
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
}

#[tokio::test]
async fn test_missing_credentials_are_rejected() {
    let (url, _state) = spawn_coordinator().await;

    let response = reqwest::get(format!("{url}/api/batches/summary")).await.unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn test_health_is_public() {
    let (url, _state) = spawn_coordinator().await;

    let health = client(&url, "nobody", "nothing").health_check().await.unwrap();
    assert!(health.healthy);
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}
