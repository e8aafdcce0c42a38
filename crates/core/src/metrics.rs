//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Stage runs (extraction, load, transform, pipeline)
//! - Per-item outcomes (sources, views)
//! - Rows loaded into the warehouse

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

use crate::stage::{StageKind, StageResult};

// =============================================================================
// Stage Metrics
// =============================================================================

/// Stage invocations by stage and result.
pub static STAGE_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("siloflow_stage_runs_total", "Total stage invocations"),
        &["stage", "result"], // "succeeded", "partial", "failed", "cancelled"
    )
    .unwrap()
});

/// Stage duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("siloflow_stage_duration_seconds", "Duration of stage invocations")
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 1800.0]),
        &["stage"],
    )
    .unwrap()
});

/// Item outcomes (one per source or view) by stage and outcome.
pub static ITEM_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("siloflow_item_outcomes_total", "Total per-item stage outcomes"),
        &["stage", "outcome"], // "succeeded", "failed", "skipped"
    )
    .unwrap()
});

/// Runs stopped at a cancellation checkpoint.
pub static CANCELLATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "siloflow_cancellations_total",
            "Total runs stopped at a cancellation checkpoint",
        ),
        &["stage"],
    )
    .unwrap()
});

// =============================================================================
// Warehouse Metrics
// =============================================================================

/// Rows loaded into raw tables.
pub static ROWS_LOADED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("siloflow_rows_loaded_total", "Total rows loaded into raw tables").unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Record a finished stage call.
pub fn record_stage(stage: StageKind, result: &str, elapsed_secs: f64) {
    STAGE_RUNS
        .with_label_values(&[stage.as_str(), result])
        .inc();
    STAGE_DURATION
        .with_label_values(&[stage.as_str()])
        .observe(elapsed_secs);
}

/// Record every item outcome of a stage result.
pub fn record_items(stage: StageKind, result: &StageResult) {
    for label in result.outcome_labels() {
        ITEM_OUTCOMES
            .with_label_values(&[stage.as_str(), label])
            .inc();
    }
}

pub fn record_cancellation(stage: StageKind) {
    CANCELLATIONS.with_label_values(&[stage.as_str()]).inc();
    STAGE_RUNS
        .with_label_values(&[stage.as_str(), "cancelled"])
        .inc();
}

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Stages
        Box::new(STAGE_RUNS.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(ITEM_OUTCOMES.clone()),
        Box::new(CANCELLATIONS.clone()),
        // Warehouse
        Box::new(ROWS_LOADED.clone()),
    ]
}
