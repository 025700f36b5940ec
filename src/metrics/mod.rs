//! Prometheus metrics for the coordinator, workers and storage consumer
//!
//! This module provides metrics tracking for:
//! - Coordinator: batch allocation, conflicts, demand samples, API requests
//! - Worker: pages fetched, fetch retries, records forwarded, batch outcomes
//! - Storage: records stored and rejected
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec,
    TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct CoordinatorMetrics {
    batches_allocated: Counter,
    allocation_conflicts: Counter,
    allocation_failures: Counter,
    batches_closed: Counter,
    demand_ready: Gauge,
    demand_poll_failures: Counter,
    api_requests: CounterVec,
    api_duration: HistogramVec,
}

struct WorkerMetrics {
    pages_fetched: Counter,
    page_fetch_retries: Counter,
    records_forwarded: Counter,
    batches: CounterVec,
    batch_duration: Histogram,
}

struct StorageMetrics {
    records_stored: Counter,
    records_rejected: Counter,
}

static COORDINATOR_METRICS: OnceLock<CoordinatorMetrics> = OnceLock::new();
static WORKER_METRICS: OnceLock<WorkerMetrics> = OnceLock::new();
static STORAGE_METRICS: OnceLock<StorageMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Registers into the default registry. Safe to call more than once; only the
/// first call registers anything.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = seqharvest::metrics::init_metrics() {
///     tracing::warn!("Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let coordinator = CoordinatorMetrics {
        batches_allocated: register_counter!(
            "seqharvest_coordinator_batches_allocated_total",
            "Batches allocated and published"
        )?,
        allocation_conflicts: register_counter!(
            "seqharvest_coordinator_allocation_conflicts_total",
            "Batch inserts rejected by the unique start constraint"
        )?,
        allocation_failures: register_counter!(
            "seqharvest_coordinator_allocation_failures_total",
            "Batches that could not be allocated or published"
        )?,
        batches_closed: register_counter!(
            "seqharvest_coordinator_batches_closed_total",
            "Batches marked completed"
        )?,
        demand_ready: register_gauge!(
            "seqharvest_coordinator_demand_ready",
            "Combined ready count observed at the last demand poll"
        )?,
        demand_poll_failures: register_counter!(
            "seqharvest_coordinator_demand_poll_failures_total",
            "Failed broker stats requests"
        )?,
        api_requests: register_counter_vec!(
            "seqharvest_coordinator_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        api_duration: register_histogram_vec!(
            "seqharvest_coordinator_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
        )?,
    };

    let worker = WorkerMetrics {
        pages_fetched: register_counter!(
            "seqharvest_worker_pages_fetched_total",
            "Match history pages fetched"
        )?,
        page_fetch_retries: register_counter!(
            "seqharvest_worker_page_fetch_retries_total",
            "Page fetch attempts that failed and were retried"
        )?,
        records_forwarded: register_counter!(
            "seqharvest_worker_records_forwarded_total",
            "Records published downstream"
        )?,
        batches: register_counter_vec!(
            "seqharvest_worker_batches_total",
            "Batch attempts by outcome",
            &["outcome"]
        )?,
        batch_duration: register_histogram!(
            "seqharvest_worker_batch_duration_seconds",
            "Wall time spent on one batch attempt",
            vec![10.0, 30.0, 60.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0]
        )?,
    };

    let storage = StorageMetrics {
        records_stored: register_counter!(
            "seqharvest_storage_records_stored_total",
            "Records written to the record store"
        )?,
        records_rejected: register_counter!(
            "seqharvest_storage_records_rejected_total",
            "Records that failed to decode or store"
        )?,
    };

    COORDINATOR_METRICS
        .set(coordinator)
        .map_err(|_| "Coordinator metrics already initialized")?;
    WORKER_METRICS
        .set(worker)
        .map_err(|_| "Worker metrics already initialized")?;
    STORAGE_METRICS
        .set(storage)
        .map_err(|_| "Storage metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    COORDINATOR_METRICS.get().is_some()
        && WORKER_METRICS.get().is_some()
        && STORAGE_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_batch_allocated() {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.batches_allocated.inc();
    }
}

pub fn record_allocation_conflict() {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.allocation_conflicts.inc();
    }
}

pub fn record_allocation_failure() {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.allocation_failures.inc();
    }
}

pub fn record_batch_closed() {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.batches_closed.inc();
    }
}

/// Record the combined ready count of the latest demand sample
pub fn set_demand_ready(ready: i64) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.demand_ready.set(ready as f64);
    }
}

pub fn record_demand_poll_failure() {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.demand_poll_failures.inc();
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = COORDINATOR_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.api_requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.api_duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

pub fn record_page_fetched() {
    if let Some(m) = WORKER_METRICS.get() {
        m.pages_fetched.inc();
    }
}

pub fn record_page_fetch_retry() {
    if let Some(m) = WORKER_METRICS.get() {
        m.page_fetch_retries.inc();
    }
}

pub fn record_records_forwarded(count: u64) {
    if count == 0 {
        return;
    }
    if let Some(m) = WORKER_METRICS.get() {
        m.records_forwarded.inc_by(count as f64);
    }
}

/// Record the outcome of one batch attempt (`succeeded`, `failed`, `caught_up`)
pub fn record_batch_outcome(outcome: &str, duration_secs: f64) {
    let Some(m) = WORKER_METRICS.get() else {
        return;
    };

    m.batches.with_label_values(&[outcome]).inc();
    m.batch_duration.observe(duration_secs);
}

pub fn record_record_stored() {
    if let Some(m) = STORAGE_METRICS.get() {
        m.records_stored.inc();
    }
}

pub fn record_record_rejected() {
    if let Some(m) = STORAGE_METRICS.get() {
        m.records_rejected.inc();
    }
}

// ============================================================================
// Tests
// ============================================================================
