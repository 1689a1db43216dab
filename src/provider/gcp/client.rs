//! GCP REST plumbing shared by the Storage and Secret Manager clients
//!
//! Uses reqwest with rustls. Every client takes its base URL explicitly so the
//! same code runs against Google APIs, emulators and Pact mock servers.
//!
//! Failure classification:
//! - HTTP 408, 429, 500, 502, 503, 504 and connect/timeout errors are transient
//! - every other non-success status is permanent and keeps its status code

use crate::error::{ExternalError, Service};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

/// Longest error body excerpt kept in an error message
const MAX_ERROR_TEXT: usize = 512;

/// Error envelope returned by Google APIs
#[derive(Debug, Deserialize)]
pub struct GcpErrorResponse {
    pub error: GcpError,
}

/// Detailed error information
///
/// Secret Manager fills `status` (`NOT_FOUND`, `FAILED_PRECONDITION`, ...);
/// the GCS JSON API leaves it out.
#[derive(Debug, Deserialize)]
pub struct GcpError {
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Authenticated HTTP client bound to one API endpoint
#[derive(Clone)]
pub struct GcpHttp {
    http_client: Client,
    base_url: String,
    access_token: String,
}

impl std::fmt::Debug for GcpHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpHttp")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GcpHttp {
    /// Create a client for `base_url` (`https://storage.googleapis.com`, a mock server, ...)
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        service: Service,
    ) -> Result<Self, ExternalError> {
        let http_client = Client::builder().build().map_err(|e| {
            ExternalError::permanent(service, "init", format!("Failed to create HTTP client: {e}"))
        })?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    /// Build HTTP request with authentication headers
    ///
    /// `path` is relative to the base URL (`storage/v1/...`, `v1/projects/...`).
    pub fn make_request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        // Add "Bearer " prefix if not already present
        let auth_header = if self.access_token.starts_with("Bearer ") {
            self.access_token.clone()
        } else {
            format!("Bearer {}", self.access_token)
        };

        let mut request = self
            .http_client
            .request(method, &url)
            .header("Authorization", auth_header);

        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .json(&body);
        }

        request
    }

    /// Send a request, mapping transport failures
    pub async fn send(
        &self,
        request: RequestBuilder,
        service: Service,
        operation: &'static str,
    ) -> Result<Response, ExternalError> {
        request
            .send()
            .await
            .map_err(|e| transport_error(service, operation, &e))
    }

    /// Parse a successful JSON response
    pub async fn read_json<T: DeserializeOwned>(
        response: Response,
        service: Service,
        operation: &'static str,
    ) -> Result<T, ExternalError> {
        response.json::<T>().await.map_err(|e| {
            ExternalError::permanent(service, operation, format!("Failed to parse response: {e}"))
        })
    }
}

/// Turn a non-success response into a classified error
pub async fn error_from_response(
    response: Response,
    service: Service,
    operation: &'static str,
) -> ExternalError {
    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    handle_error_response(service, operation, status, &error_text)
}

/// Handle GCP API error responses
#[must_use]
pub fn handle_error_response(
    service: Service,
    operation: &'static str,
    status: StatusCode,
    error_text: &str,
) -> ExternalError {
    let message = match serde_json::from_str::<GcpErrorResponse>(error_text) {
        Ok(parsed) => match parsed.error.status {
            Some(api_status) => format!(
                "GCP API error: {} (code: {}, status: {})",
                parsed.error.message, parsed.error.code, api_status
            ),
            None => format!(
                "GCP API error: {} (code: {})",
                parsed.error.message, parsed.error.code
            ),
        },
        Err(_) => format!("HTTP {}: {}", status.as_u16(), truncate(error_text)),
    };
    debug!(service = %service, operation, status = status.as_u16(), "GCP API error response");

    if is_transient_status(status) {
        ExternalError::transient(service, operation, message)
    } else {
        ExternalError::permanent_status(service, operation, status.as_u16(), message)
    }
}

/// Google error status string (`FAILED_PRECONDITION`, ...) of an error body
#[must_use]
pub fn api_status(error_text: &str) -> Option<String> {
    serde_json::from_str::<GcpErrorResponse>(error_text)
        .ok()
        .and_then(|r| r.error.status)
}

#[must_use]
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
}

fn transport_error(service: Service, operation: &'static str, error: &reqwest::Error) -> ExternalError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        ExternalError::transient(service, operation, format!("request failed: {error}"))
    } else {
        ExternalError::permanent(service, operation, format!("request failed: {error}"))
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_ERROR_TEXT {
        return text.to_string();
    }
    let mut end = MAX_ERROR_TEXT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        for code in [408u16, 429, 500, 502, 503, 504] {
            assert!(is_transient_status(StatusCode::from_u16(code).unwrap()), "{code}");
        }
        for code in [400u16, 401, 403, 404, 409, 412] {
            assert!(!is_transient_status(StatusCode::from_u16(code).unwrap()), "{code}");
        }
    }

    #[test]
    fn test_secret_manager_error_body() {
        let body = r#"{"error":{"code":403,"message":"Permission denied","status":"PERMISSION_DENIED"}}"#;
        let err = handle_error_response(Service::SecretStore, "add_version", StatusCode::FORBIDDEN, body);
        assert!(!err.is_transient());
        assert_eq!(err.status(), Some(403));
        assert!(err.to_string().contains("PERMISSION_DENIED"));
        assert_eq!(api_status(body).as_deref(), Some("PERMISSION_DENIED"));
    }

    #[test]
    fn test_storage_error_body_without_status() {
        let body = r#"{"error":{"code":503,"message":"Backend Error","errors":[]}}"#;
        let err = handle_error_response(
            Service::CredentialStore,
            "create_key",
            StatusCode::SERVICE_UNAVAILABLE,
            body,
        );
        assert!(err.is_transient());
        assert!(err.to_string().contains("Backend Error"));
    }

    #[test]
    fn test_plain_text_error_is_truncated() {
        let body = "x".repeat(2000);
        let err = handle_error_response(Service::Storage, "get_bucket", StatusCode::BAD_GATEWAY, &body);
        assert!(err.to_string().len() < 700);
    }
}
