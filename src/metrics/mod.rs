//! Prometheus metrics for the task queue, credential pool and workers
//!
//! This module provides metrics tracking for:
//! - Queue: pushes, pops, completions, retries, deferrals, dead-letters, queue depth
//! - Credential pool: leases, shortages, failures, deactivations
//! - Workers: heartbeats and task handling duration
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails (or never happens), metrics operations become
//! no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram_vec, Counter,
    CounterVec, Encoder, GaugeVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all queue metrics
struct QueueMetrics {
    tasks_pushed: CounterVec,
    tasks_popped: CounterVec,
    tasks_completed: CounterVec,
    tasks_retried: CounterVec,
    tasks_requeued: CounterVec,
    tasks_deferred: CounterVec,
    tasks_dead_lettered: CounterVec,
    pop_contention: CounterVec,
    queue_depth: GaugeVec,
}

/// Container for all credential pool metrics
struct PoolMetrics {
    credentials_acquired: CounterVec,
    credential_shortages: CounterVec,
    credential_failures: CounterVec,
    credential_deactivations: CounterVec,
}

/// Container for worker-side metrics
struct WorkerMetrics {
    heartbeats: CounterVec,
    heartbeat_errors: Counter,
    task_duration: HistogramVec,
}

static QUEUE_METRICS: OnceLock<QueueMetrics> = OnceLock::new();

static POOL_METRICS: OnceLock<PoolMetrics> = OnceLock::new();

static WORKER_METRICS: OnceLock<WorkerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Call once at startup. Registration errors are returned so the caller
/// can log them; the process keeps running with metrics disabled.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = agentfleet::metrics::init_metrics() {
///     tracing::warn!(error = %e, "Metrics initialization failed");
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let queue = QueueMetrics {
        tasks_pushed: register_counter_vec!(
            "agentfleet_queue_tasks_pushed_total",
            "Total tasks pushed by label",
            &["label"]
        )?,
        tasks_popped: register_counter_vec!(
            "agentfleet_queue_tasks_popped_total",
            "Total tasks handed to workers by label",
            &["label"]
        )?,
        tasks_completed: register_counter_vec!(
            "agentfleet_queue_tasks_completed_total",
            "Total tasks completed by label",
            &["label"]
        )?,
        tasks_retried: register_counter_vec!(
            "agentfleet_queue_tasks_retried_total",
            "Total failed tasks re-queued for retry by label",
            &["label"]
        )?,
        tasks_requeued: register_counter_vec!(
            "agentfleet_queue_tasks_requeued_total",
            "Total tasks returned to the queue without consuming retries",
            &["label"]
        )?,
        tasks_deferred: register_counter_vec!(
            "agentfleet_queue_tasks_deferred_total",
            "Total tasks held back until a ready time by label",
            &["label"]
        )?,
        tasks_dead_lettered: register_counter_vec!(
            "agentfleet_queue_tasks_dead_lettered_total",
            "Total tasks moved to the dead-letter list by label",
            &["label"]
        )?,
        pop_contention: register_counter_vec!(
            "agentfleet_queue_pop_contention_total",
            "Pop attempts that lost the race for a task",
            &["label"]
        )?,
        queue_depth: register_gauge_vec!(
            "agentfleet_queue_depth",
            "Pending tasks per label at last observation",
            &["label"]
        )?,
    };

    let pool = PoolMetrics {
        credentials_acquired: register_counter_vec!(
            "agentfleet_pool_credentials_acquired_total",
            "Total credential leases granted by platform",
            &["platform"]
        )?,
        credential_shortages: register_counter_vec!(
            "agentfleet_pool_credential_shortages_total",
            "Acquire calls that found no eligible credential",
            &["platform"]
        )?,
        credential_failures: register_counter_vec!(
            "agentfleet_pool_credential_failures_total",
            "Credential failures reported by platform",
            &["platform"]
        )?,
        credential_deactivations: register_counter_vec!(
            "agentfleet_pool_credential_deactivations_total",
            "Credentials deactivated after repeated failures",
            &["platform"]
        )?,
    };

    let worker = WorkerMetrics {
        heartbeats: register_counter_vec!(
            "agentfleet_worker_heartbeats_total",
            "Total heartbeats published by worker",
            &["worker"]
        )?,
        heartbeat_errors: register_counter!(
            "agentfleet_worker_heartbeat_errors_total",
            "Total heartbeat publish failures"
        )?,
        task_duration: register_histogram_vec!(
            "agentfleet_worker_task_duration_seconds",
            "Time spent inside task handlers in seconds",
            &["label"],
            vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0]
        )?,
    };

    QUEUE_METRICS
        .set(queue)
        .map_err(|_| "Queue metrics already initialized")?;
    POOL_METRICS
        .set(pool)
        .map_err(|_| "Pool metrics already initialized")?;
    WORKER_METRICS
        .set(worker)
        .map_err(|_| "Worker metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    QUEUE_METRICS.get().is_some() && POOL_METRICS.get().is_some() && WORKER_METRICS.get().is_some()
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

// ---- queue -----------------------------------------------------------------

pub fn record_task_pushed(label: &str) {
    if let Some(m) = QUEUE_METRICS.get() {
        m.tasks_pushed.with_label_values(&[label]).inc();
    }
}

pub fn record_task_popped(label: &str) {
    if let Some(m) = QUEUE_METRICS.get() {
        m.tasks_popped.with_label_values(&[label]).inc();
    }
}

pub fn record_task_completed(label: &str) {
    if let Some(m) = QUEUE_METRICS.get() {
        m.tasks_completed.with_label_values(&[label]).inc();
    }
}

pub fn record_task_retried(label: &str) {
    if let Some(m) = QUEUE_METRICS.get() {
        m.tasks_retried.with_label_values(&[label]).inc();
    }
}

pub fn record_task_requeued(label: &str) {
    if let Some(m) = QUEUE_METRICS.get() {
        m.tasks_requeued.with_label_values(&[label]).inc();
    }
}

pub fn record_task_deferred(label: &str) {
    if let Some(m) = QUEUE_METRICS.get() {
        m.tasks_deferred.with_label_values(&[label]).inc();
    }
}

pub fn record_task_dead_lettered(label: &str) {
    if let Some(m) = QUEUE_METRICS.get() {
        m.tasks_dead_lettered.with_label_values(&[label]).inc();
    }
}

pub fn record_pop_contention(label: &str) {
    if let Some(m) = QUEUE_METRICS.get() {
        m.pop_contention.with_label_values(&[label]).inc();
    }
}

/// Update the depth gauge after reading a queue length
pub fn update_queue_depth(label: &str, depth: u64) {
    if let Some(m) = QUEUE_METRICS.get() {
        m.queue_depth.with_label_values(&[label]).set(depth as f64);
    }
}

// ---- credential pool -------------------------------------------------------

pub fn record_credential_acquired(platform: &str) {
    if let Some(m) = POOL_METRICS.get() {
        m.credentials_acquired.with_label_values(&[platform]).inc();
    }
}

pub fn record_credential_shortage(platform: &str) {
    if let Some(m) = POOL_METRICS.get() {
        m.credential_shortages.with_label_values(&[platform]).inc();
    }
}

/// Record a reported credential failure, and whether it deactivated the credential
pub fn record_credential_failure(platform: &str, deactivated: bool) {
    let Some(m) = POOL_METRICS.get() else {
        return;
    };

    m.credential_failures.with_label_values(&[platform]).inc();
    if deactivated {
        m.credential_deactivations
            .with_label_values(&[platform])
            .inc();
    }
}

// ---- workers ---------------------------------------------------------------

pub fn record_heartbeat(worker: &str) {
    if let Some(m) = WORKER_METRICS.get() {
        m.heartbeats.with_label_values(&[worker]).inc();
    }
}

pub fn record_heartbeat_error() {
    if let Some(m) = WORKER_METRICS.get() {
        m.heartbeat_errors.inc();
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start timing a task handler run
pub fn start_task_timer(label: &str) -> MetricsTimer {
    match WORKER_METRICS.get() {
        Some(m) => MetricsTimer::new(m.task_duration.with_label_values(&[label]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
