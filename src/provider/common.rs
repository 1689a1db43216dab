//! Common utilities shared by the GCP REST clients

use crate::error::{ExternalError, Service};
use crate::observability::metrics;
use std::time::{Duration, Instant};
use tracing::Span;

/// Records operation metrics and span attributes for a successful operation
pub fn record_success_metrics(span: &Span, service: Service, operation: &str, duration: Duration) {
    span.record("operation.name", operation);
    span.record("operation.duration_ms", duration.as_millis() as u64);
    span.record("operation.success", true);
    metrics::record_provider_operation(service.as_str(), operation, duration.as_secs_f64());
}

/// Records operation metrics and span attributes for a failed operation
pub fn record_error_metrics(span: &Span, error: &ExternalError, duration: Duration) {
    span.record("operation.name", error.operation());
    span.record("operation.success", false);
    span.record("operation.duration_ms", duration.as_millis() as u64);
    span.record("error.class", error.class());
    span.record("error.message", error.to_string().as_str());
    metrics::record_provider_operation(
        error.service().as_str(),
        error.operation(),
        duration.as_secs_f64(),
    );
    metrics::increment_provider_operation_errors(error.service().as_str(), error.class());
}

/// Formats a GCP secret resource path
pub fn format_secret_path(project_id: &str, secret_name: &str) -> String {
    format!("projects/{project_id}/secrets/{secret_name}")
}

/// Formats a GCP secret version path
pub fn format_secret_version_path(project_id: &str, secret_name: &str, version: &str) -> String {
    format!("projects/{project_id}/secrets/{secret_name}/versions/{version}")
}

/// Parse the numeric version id from a version resource name
/// (`projects/p/secrets/s/versions/12` gives `12`)
#[must_use]
pub fn parse_version_id(name: &str) -> Option<u64> {
    name.rsplit('/').next()?.parse().ok()
}

/// Helper struct for tracking operation state
#[derive(Debug)]
pub struct OperationTracker {
    start: Instant,
    span: Span,
    service: Service,
    operation: &'static str,
}

impl OperationTracker {
    /// Create a new operation tracker
    pub fn new(span: Span, service: Service, operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            span,
            service,
            operation,
        }
    }

    /// Record success metrics
    pub fn record_success(&self) {
        record_success_metrics(&self.span, self.service, self.operation, self.start.elapsed());
    }

    /// Record error metrics
    pub fn record_error(&self, error: &ExternalError) {
        record_error_metrics(&self.span, error, self.start.elapsed());
    }

    /// Record the outcome of `result` and hand it back
    pub fn finish<T>(&self, result: Result<T, ExternalError>) -> Result<T, ExternalError> {
        match &result {
            Ok(_) => self.record_success(),
            Err(e) => self.record_error(e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_id() {
        assert_eq!(
            parse_version_id("projects/p/secrets/gcs-hmac-key/versions/12"),
            Some(12)
        );
        assert_eq!(parse_version_id("projects/p/secrets/s/versions/latest"), None);
        assert_eq!(parse_version_id(""), None);
    }

    #[test]
    fn test_format_paths() {
        assert_eq!(format_secret_path("p", "s"), "projects/p/secrets/s");
        assert_eq!(
            format_secret_version_path("p", "s", "3"),
            "projects/p/secrets/s/versions/3"
        );
    }
}
