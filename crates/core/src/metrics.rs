//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Run admission and terminal outcomes
//! - Stage executions (per stage, per outcome) and their duration
//! - Retries, credit settlement, queue leases and publishing

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Runs
// =============================================================================

/// Runs admitted, by kind.
pub static RUNS_CREATED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("conveyor_runs_created_total", "Total runs admitted"),
        &["kind"], // "tool_run", "pipeline_run"
    )
    .unwrap()
});

/// Runs rejected at admission, by reason.
pub static RUNS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "conveyor_runs_rejected_total",
            "Total run creation requests rejected",
        ),
        &["reason"], // "invalid_input", "not_found", "insufficient_credits", "internal"
    )
    .unwrap()
});

/// Runs that reached a terminal state.
pub static RUNS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("conveyor_runs_finished_total", "Total runs finished"),
        &["status"], // "complete", "error", "cancelled"
    )
    .unwrap()
});

// =============================================================================
// Stages
// =============================================================================

/// Stage handler executions by stage and outcome.
pub static STAGE_EXECUTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "conveyor_stage_executions_total",
            "Total stage handler executions",
        ),
        &["stage", "outcome"], // outcome: "success", "transient", "permanent", "cancelled", "panic"
    )
    .unwrap()
});

/// Stage handler duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "conveyor_stage_duration_seconds",
            "Duration of stage handler executions",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["stage"],
    )
    .unwrap()
});

/// Retries performed by the retry policy, by operation.
pub static RETRY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("conveyor_retry_attempts_total", "Total retry attempts"),
        &["operation"],
    )
    .unwrap()
});

/// Credits settled, by stage.
pub static CREDITS_DEBITED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("conveyor_credits_debited_total", "Total credits settled"),
        &["stage"],
    )
    .unwrap()
});

// =============================================================================
// Queue and publishing
// =============================================================================

/// Leases granted, by queue.
pub static QUEUE_LEASES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("conveyor_queue_leases_total", "Total leases granted"),
        &["queue"],
    )
    .unwrap()
});

/// Leases lost before the executor finished, by queue.
pub static LEASES_LOST: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "conveyor_leases_lost_total",
            "Total leases that expired under a running executor",
        ),
        &["queue"],
    )
    .unwrap()
});

/// Run events dropped or rejected by the transport.
pub static PUBLISH_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "conveyor_publish_failures_total",
        "Total run events that could not be published",
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Runs
        Box::new(RUNS_CREATED.clone()),
        Box::new(RUNS_REJECTED.clone()),
        Box::new(RUNS_FINISHED.clone()),
        // Stages
        Box::new(STAGE_EXECUTIONS.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(RETRY_ATTEMPTS.clone()),
        Box::new(CREDITS_DEBITED.clone()),
        // Queue and publishing
        Box::new(QUEUE_LEASES.clone()),
        Box::new(LEASES_LOST.clone()),
        Box::new(PUBLISH_FAILURES.clone()),
    ]
}
