//! REST API handlers for the Coordinator server
//!
//! This module defines the API routes and handlers for the coordinator.
//! Everything under `/api/batches` requires worker credentials.

use axum::{
    extract::{MatchedPath, Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info};

use super::auth::{require_worker, WorkerIdentity};
use super::server::AppState;
use crate::metrics;
use crate::models::{Batch, BatchId};

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Body of an attempt report
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AttemptRequest {
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Result of a completion report
#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// `false` if the batch had already been completed
    pub completed: bool,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let batch_routes = Router::new()
        .route("/api/batches/summary", get(batch_summary))
        .route("/api/batches/{id}", get(get_batch))
        .route("/api/batches/{id}/attempts", post(record_attempt))
        .route("/api/batches/{id}/complete", post(complete_batch))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_worker,
        ));

    Router::new()
        // Health endpoints
        .route("/api/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        // Batch endpoints
        .merge(batch_routes)
        .route_layer(middleware::from_fn(track_requests))
        .with_state(state)
}

/// Record request counts and latency per matched route
async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    let started = Instant::now();
    let response = next.run(request).await;
    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

fn store_failure(context: &str, e: impl std::fmt::Display) -> Response {
    error!(error = %e, "{}", context);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(context)),
    )
        .into_response()
}

fn parse_batch_id(id: &str) -> Result<BatchId, Response> {
    id.parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(format!("Invalid batch ID: {}", id))),
        )
            .into_response()
    })
}

fn batch_not_found(id: &BatchId) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(format!("Batch not found: {}", id))),
    )
        .into_response()
}

// ============================================================================
// Health Handlers
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();

    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
    }))
}

/// Prometheus text exposition
async fn metrics_handler() -> Response {
    match metrics::encode_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => store_failure("Failed to encode metrics", e),
    }
}

// ============================================================================
// Batch Handlers
// ============================================================================

async fn batch_summary(State(state): State<AppState>) -> Response {
    match state.batches.summary() {
        Ok(summary) => (StatusCode::OK, Json(ApiResponse::success(summary))).into_response(),
        Err(e) => store_failure("Failed to read batch summary", e),
    }
}

async fn get_batch(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_batch_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.batches.get(&id) {
        Ok(Some(batch)) => (StatusCode::OK, Json(ApiResponse::success(batch))).into_response(),
        Ok(None) => batch_not_found(&id),
        Err(e) => store_failure("Failed to read batch", e),
    }
}

/// Count a delivery attempt against the calling worker
async fn record_attempt(
    State(state): State<AppState>,
    Extension(worker): Extension<WorkerIdentity>,
    Path(id): Path<String>,
    Json(request): Json<AttemptRequest>,
) -> Response {
    let id = match parse_batch_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state
        .batches
        .record_attempt(&id, worker.as_str(), request.user_agent.as_deref())
    {
        Ok(Some(batch)) => {
            info!(batch_id = %id, %worker, attempts = batch.attempts, "Batch attempt reported");
            (StatusCode::OK, Json(ApiResponse::<Batch>::success(batch))).into_response()
        }
        Ok(None) => batch_not_found(&id),
        Err(e) => store_failure("Failed to record attempt", e),
    }
}

/// Mark a batch completed
async fn complete_batch(
    State(state): State<AppState>,
    Extension(worker): Extension<WorkerIdentity>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_batch_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let batch = match state.batches.get(&id) {
        Ok(Some(batch)) => batch,
        Ok(None) => return batch_not_found(&id),
        Err(e) => return store_failure("Failed to read batch", e),
    };

    match state.allocator.close(&batch) {
        Ok(completed) => {
            info!(batch_id = %id, %worker, completed, "Batch completion reported");
            (
                StatusCode::OK,
                Json(ApiResponse::success(CompletionResponse { completed })),
            )
                .into_response()
        }
        Err(e) => store_failure("Failed to complete batch", e),
    }
}

// ============================================================================
// Tests
// ============================================================================
