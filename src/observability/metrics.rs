//! # Metrics
//!
//! Prometheus metrics for rotation runs.
//!
//! ## Metrics Exposed
//!
//! - `hmac_rotator_runs_total` - Finished runs by terminal status
//! - `hmac_rotator_run_duration_seconds` - Wall time of a run
//! - `hmac_rotator_phase_duration_seconds` - Time spent per phase
//! - `hmac_rotator_last_success_timestamp_seconds` - Unix time of the last run that persisted a key
//! - `hmac_rotator_provider_operations_total` - External calls by service and operation
//! - `hmac_rotator_provider_operation_duration_seconds` - Duration of external calls
//! - `hmac_rotator_provider_operation_errors_total` - Failed external calls by class
//! - `hmac_rotator_retries_total` - Retried external calls
//! - `hmac_rotator_cleanup_failures_total` - Prune/deactivate items that did not complete
//!
//! The rotator runs as a short-lived job, so instead of serving `/metrics` the
//! registry can be written to a node-exporter textfile when the run ends.

use anyhow::{Context, Result};
use prometheus::{
    Encoder, Histogram, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::path::Path;
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RUNS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "hmac_rotator_runs_total",
            "Total number of rotation runs by terminal status",
        ),
        &["status"],
    )
    .expect("Failed to create RUNS_TOTAL metric - this should never happen")
});

static RUN_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "hmac_rotator_run_duration_seconds",
            "Duration of a rotation run in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
    )
    .expect("Failed to create RUN_DURATION metric - this should never happen")
});

static PHASE_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "hmac_rotator_phase_duration_seconds",
            "Duration of each rotation phase in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["phase"],
    )
    .expect("Failed to create PHASE_DURATION metric - this should never happen")
});

static LAST_SUCCESS_TIMESTAMP: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "hmac_rotator_last_success_timestamp_seconds",
        "Unix timestamp of the last run that persisted a new key",
    )
    .expect("Failed to create LAST_SUCCESS_TIMESTAMP metric - this should never happen")
});

static PROVIDER_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "hmac_rotator_provider_operations_total",
            "Total number of external calls by service and operation",
        ),
        &["service", "operation"],
    )
    .expect("Failed to create PROVIDER_OPERATIONS_TOTAL metric - this should never happen")
});

static PROVIDER_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "hmac_rotator_provider_operation_duration_seconds",
            "Duration of external calls in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["service", "operation"],
    )
    .expect("Failed to create PROVIDER_OPERATION_DURATION metric - this should never happen")
});

static PROVIDER_OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "hmac_rotator_provider_operation_errors_total",
            "Total number of failed external calls by service and error class",
        ),
        &["service", "class"],
    )
    .expect("Failed to create PROVIDER_OPERATION_ERRORS_TOTAL metric - this should never happen")
});

static RETRIES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "hmac_rotator_retries_total",
            "Total number of retried external calls by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create RETRIES_TOTAL metric - this should never happen")
});

static CLEANUP_FAILURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "hmac_rotator_cleanup_failures_total",
            "Total number of cleanup items that did not complete",
        ),
        &["kind"],
    )
    .expect("Failed to create CLEANUP_FAILURES_TOTAL metric - this should never happen")
});

/// Register all metrics with the process registry
///
/// Call once at startup. A second call fails with `AlreadyReg`.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RUNS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RUN_DURATION.clone()))?;
    REGISTRY.register(Box::new(PHASE_DURATION.clone()))?;
    REGISTRY.register(Box::new(LAST_SUCCESS_TIMESTAMP.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_OPERATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_OPERATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CLEANUP_FAILURES_TOTAL.clone()))?;

    Ok(())
}

pub fn record_run(status: &str, duration: f64) {
    RUNS_TOTAL.with_label_values(&[status]).inc();
    RUN_DURATION.observe(duration);
}

pub fn observe_phase_duration(phase: &str, duration: f64) {
    PHASE_DURATION.with_label_values(&[phase]).observe(duration);
}

pub fn set_last_success_timestamp(unix_seconds: i64) {
    LAST_SUCCESS_TIMESTAMP.set(unix_seconds);
}

pub fn record_provider_operation(service: &str, operation: &str, duration: f64) {
    PROVIDER_OPERATIONS_TOTAL
        .with_label_values(&[service, operation])
        .inc();
    PROVIDER_OPERATION_DURATION
        .with_label_values(&[service, operation])
        .observe(duration);
}

pub fn increment_provider_operation_errors(service: &str, class: &str) {
    PROVIDER_OPERATION_ERRORS_TOTAL
        .with_label_values(&[service, class])
        .inc();
}

pub fn increment_retries(operation: &str) {
    RETRIES_TOTAL.with_label_values(&[operation]).inc();
}

pub fn increment_cleanup_failures(kind: &str) {
    CLEANUP_FAILURES_TOTAL.with_label_values(&[kind]).inc();
}

/// Render the registry in Prometheus text exposition format
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not UTF-8")
}

/// Write the registry to a textfile collector path
///
/// Writes to a sibling temp file first and renames it, so the collector never
/// reads a half-written file.
pub fn write_textfile(path: &Path) -> Result<()> {
    let body = render()?;
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, body)
        .with_context(|| format!("Failed to write metrics to {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move metrics into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_write_textfile() {
        assert!(register_metrics().is_ok());

        record_run("success", 1.5);
        record_provider_operation("secret_store", "add_version", 0.2);
        increment_retries("add_version");
        increment_cleanup_failures("disable_version");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hmac_rotator.prom");
        write_textfile(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("hmac_rotator_runs_total{status=\"success\"}"));
        assert!(text.contains("hmac_rotator_retries_total{operation=\"add_version\"}"));
        assert!(!dir.path().join("hmac_rotator.prom.tmp").exists());
    }
}
