//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `ingress_controller_reconciliations_total` - Total number of sync attempts
//! - `ingress_controller_reconciliation_errors_total` - Total number of failed sync attempts
//! - `ingress_controller_reconciliation_duration_seconds` - Duration of sync attempts
//! - `ingress_controller_requeues_total` - Total number of rate-limited requeues
//! - `ingress_controller_workqueue_depth` - Keys currently pending in the work queue

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntGauge, Registry};

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ingress_controller_reconciliations_total",
        "Total number of sync attempts",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ingress_controller_reconciliation_errors_total",
        "Total number of failed sync attempts",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "ingress_controller_reconciliation_duration_seconds",
            "Duration of sync attempts in seconds",
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ingress_controller_requeues_total",
        "Total number of rate-limited requeues after sync errors",
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static WORKQUEUE_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "ingress_controller_workqueue_depth",
        "Keys currently pending in the work queue",
    )
    .expect("Failed to create WORKQUEUE_DEPTH metric - this should never happen")
});

/// Register all metrics with the crate registry. Call once at startup.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WORKQUEUE_DEPTH.clone()))?;
    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn increment_requeues() {
    REQUEUES_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: Duration) {
    RECONCILIATION_DURATION.observe(duration.as_secs_f64());
}

pub fn set_queue_depth(depth: usize) {
    WORKQUEUE_DEPTH.set(i64::try_from(depth).unwrap_or(i64::MAX));
}
