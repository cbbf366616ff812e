//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `secrets_broker_reconciliations_total` - Total number of reconciliations
//! - `secrets_broker_reconciliation_errors_total` - Reconciliation errors by class
//! - `secrets_broker_reconciliation_duration_seconds` - Duration of reconcile invocations
//! - `secrets_broker_phase_transitions_total` - Phase transitions by target phase
//! - `secrets_broker_secrets_created_total` - Managed Secrets created
//! - `secrets_broker_secrets_updated_total` - Managed Secrets rewritten in place
//! - `secrets_broker_drift_detected_total` - Managed Secrets found missing or changed
//! - `secrets_broker_status_writes_total` - Status subresource writes
//! - `secrets_broker_status_writes_skipped_total` - Status writes skipped as no-ops
//! - `secrets_broker_provider_fetch_duration_seconds` - Secret store reads by outcome

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secrets_broker_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secrets_broker_reconciliation_errors_total",
            "Total number of reconciliation errors by error class",
        ),
        &["error"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "secrets_broker_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static PHASE_TRANSITIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secrets_broker_phase_transitions_total",
            "Total number of phase transitions by target phase",
        ),
        &["phase"],
    )
    .expect("Failed to create PHASE_TRANSITIONS_TOTAL metric - this should never happen")
});

static SECRETS_CREATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secrets_broker_secrets_created_total",
        "Total number of managed Secrets created",
    )
    .expect("Failed to create SECRETS_CREATED_TOTAL metric - this should never happen")
});

static SECRETS_UPDATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secrets_broker_secrets_updated_total",
        "Total number of managed Secrets rewritten from the secret store",
    )
    .expect("Failed to create SECRETS_UPDATED_TOTAL metric - this should never happen")
});

static DRIFT_DETECTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secrets_broker_drift_detected_total",
        "Total number of managed Secrets found missing or differing from the store",
    )
    .expect("Failed to create DRIFT_DETECTED_TOTAL metric - this should never happen")
});

static STATUS_WRITES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secrets_broker_status_writes_total",
        "Total number of status subresource writes",
    )
    .expect("Failed to create STATUS_WRITES_TOTAL metric - this should never happen")
});

static STATUS_WRITES_SKIPPED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secrets_broker_status_writes_skipped_total",
        "Total number of status writes skipped because nothing changed",
    )
    .expect("Failed to create STATUS_WRITES_SKIPPED_TOTAL metric - this should never happen")
});

static PROVIDER_FETCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "secrets_broker_provider_fetch_duration_seconds",
            "Duration of secret store reads in seconds by outcome",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["outcome"],
    )
    .expect("Failed to create PROVIDER_FETCH_DURATION metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Fails only if a metric is registered twice"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(PHASE_TRANSITIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRETS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRETS_UPDATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DRIFT_DETECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_WRITES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_WRITES_SKIPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_FETCH_DURATION.clone()))?;

    Ok(())
}

/// Gather all registered metric families
#[must_use]
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors(error: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[error]).inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_phase_transitions(phase: &str) {
    PHASE_TRANSITIONS_TOTAL.with_label_values(&[phase]).inc();
}

pub fn increment_secrets_created() {
    SECRETS_CREATED_TOTAL.inc();
}

pub fn increment_secrets_updated() {
    SECRETS_UPDATED_TOTAL.inc();
}

pub fn increment_drift_detected() {
    DRIFT_DETECTED_TOTAL.inc();
}

pub fn increment_status_writes() {
    STATUS_WRITES_TOTAL.inc();
}

pub fn increment_status_writes_skipped() {
    STATUS_WRITES_SKIPPED_TOTAL.inc();
}

pub fn observe_provider_fetch(duration: f64, outcome: &str) {
    PROVIDER_FETCH_DURATION
        .with_label_values(&[outcome])
        .observe(duration);
}
