//! GCP Secret Manager REST Client
//!
//! Native REST implementation of [`SecretStore`] on Secret Manager API v1.
//!
//! - Works directly with Pact HTTP mock servers
//! - Uses reqwest with rustls (no OpenSSL dependencies)
//! - Creates the secret on first write
//!
//! References:
//! - [GCP Secret Manager REST API v1](https://cloud.google.com/secret-manager/docs/reference/rest)

mod requests;
mod responses;

pub use requests::*;
pub use responses::*;

use super::client::{api_status, error_from_response, handle_error_response, GcpHttp};
use crate::constants::SECRET_VERSIONS_PAGE_SIZE;
use crate::error::{ExternalError, Service};
use crate::model::secret::sort_newest_first;
use crate::model::{SecretRecord, VersionState};
use crate::provider::common::{
    format_secret_path, format_secret_version_path, parse_version_id, OperationTracker,
};
use crate::provider::SecretStore;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Method, StatusCode};
use tracing::{debug, debug_span, info, info_span, Instrument, Span};
use zeroize::Zeroizing;

const SERVICE: Service = Service::SecretStore;

/// GCP Secret Manager REST client
#[derive(Debug, Clone)]
pub struct SecretManagerRest {
    http: GcpHttp,
    project_id: String,
    /// Added as the `bucket` label when the secret is created
    bucket_label: Option<String>,
}

/// Result of one `addVersion` attempt
enum AddOutcome {
    Added(u64),
    SecretMissing,
}

impl SecretManagerRest {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Result<Self, ExternalError> {
        Ok(Self {
            http: GcpHttp::new(base_url, access_token, SERVICE)?,
            project_id: project_id.into(),
            bucket_label: None,
        })
    }

    /// Label secrets created by this client with the bucket they serve
    #[must_use]
    pub fn with_bucket_label(mut self, bucket: impl Into<String>) -> Self {
        self.bucket_label = Some(bucket.into());
        self
    }

    fn secret_path(&self, secret_name: &str) -> String {
        format!("v1/{}", format_secret_path(&self.project_id, secret_name))
    }

    fn version_path(&self, secret_name: &str, version: &str) -> String {
        format!(
            "v1/{}",
            format_secret_version_path(&self.project_id, secret_name, version)
        )
    }

    fn span(name: &'static str, secret_name: &str) -> Span {
        let span = match name {
            "add_version" | "disable_version" | "create_secret" => info_span!(
                "gcp.secret",
                secret.name = %secret_name,
                operation.name = tracing::field::Empty,
                operation.success = tracing::field::Empty,
                operation.duration_ms = tracing::field::Empty,
                error.class = tracing::field::Empty,
                error.message = tracing::field::Empty,
            ),
            _ => debug_span!(
                "gcp.secret",
                secret.name = %secret_name,
                operation.name = tracing::field::Empty,
                operation.success = tracing::field::Empty,
                operation.duration_ms = tracing::field::Empty,
                error.class = tracing::field::Empty,
                error.message = tracing::field::Empty,
            ),
        };
        span.record("operation.name", name);
        span
    }

    /// `POST v1/projects/{project}/secrets?secretId={secret}`; 409 counts as created
    async fn create_secret(&self, secret_name: &str) -> Result<(), ExternalError> {
        let span = Self::span("create_secret", secret_name);
        let tracker = OperationTracker::new(span.clone(), SERVICE, "create_secret");

        let result: Result<(), ExternalError> = async {
            let body = serde_json::to_value(CreateSecretRequest::new(self.bucket_label.as_deref()))
                .map_err(|e| ExternalError::permanent(SERVICE, "create_secret", e.to_string()))?;
            let request = self
                .http
                .make_request(
                    Method::POST,
                    &format!("v1/projects/{}/secrets", self.project_id),
                    Some(body),
                )
                .query(&[("secretId", secret_name)]);
            let response = self.http.send(request, SERVICE, "create_secret").await?;

            match response.status() {
                status if status.is_success() => {
                    info!("Created GCP secret: {}", secret_name);
                    Ok(())
                }
                StatusCode::CONFLICT => {
                    debug!("Secret {} was created concurrently", secret_name);
                    Ok(())
                }
                _ => Err(error_from_response(response, SERVICE, "create_secret").await),
            }
        }
        .instrument(span)
        .await;
        tracker.finish(result)
    }

    async fn try_add_version(
        &self,
        secret_name: &str,
        encoded: &str,
    ) -> Result<AddOutcome, ExternalError> {
        let body = serde_json::to_value(AddVersionRequest::new(encoded.to_string()))
            .map_err(|e| ExternalError::permanent(SERVICE, "add_version", e.to_string()))?;
        let request = self.http.make_request(
            Method::POST,
            &format!("{}:addVersion", self.secret_path(secret_name)),
            Some(body),
        );
        let response = self.http.send(request, SERVICE, "add_version").await?;

        match response.status() {
            status if status.is_success() => {
                let version: SecretVersion =
                    GcpHttp::read_json(response, SERVICE, "add_version").await?;
                parse_version_id(&version.name)
                    .map(AddOutcome::Added)
                    .ok_or_else(|| {
                        ExternalError::permanent(
                            SERVICE,
                            "add_version",
                            format!("unexpected version name '{}'", version.name),
                        )
                    })
            }
            StatusCode::NOT_FOUND => Ok(AddOutcome::SecretMissing),
            _ => Err(error_from_response(response, SERVICE, "add_version").await),
        }
    }

    async fn get_version(
        &self,
        secret_name: &str,
        version_id: u64,
    ) -> Result<SecretVersion, ExternalError> {
        let request = self.http.make_request(
            Method::GET,
            &self.version_path(secret_name, &version_id.to_string()),
            None,
        );
        let response = self.http.send(request, SERVICE, "get_version").await?;
        if !response.status().is_success() {
            return Err(error_from_response(response, SERVICE, "get_version").await);
        }
        GcpHttp::read_json(response, SERVICE, "get_version").await
    }

    /// `GET .../versions/{version}:access`, `None` on 404
    async fn access(
        &self,
        secret_name: &str,
        version: &str,
        operation: &'static str,
    ) -> Result<Option<Zeroizing<String>>, ExternalError> {
        let request = self.http.make_request(
            Method::GET,
            &format!("{}:access", self.version_path(secret_name, version)),
            None,
        );
        let response = self.http.send(request, SERVICE, operation).await?;

        match response.status() {
            status if status.is_success() => {
                let access: AccessSecretVersionResponse =
                    GcpHttp::read_json(response, SERVICE, operation).await?;
                decode_payload(&access.payload.data, operation).map(Some)
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(error_from_response(response, SERVICE, operation).await),
        }
    }
}

/// Base64 payload to UTF-8 text
fn decode_payload(data: &str, operation: &'static str) -> Result<Zeroizing<String>, ExternalError> {
    let decoded = general_purpose::STANDARD
        .decode(data.as_bytes())
        .map_err(|e| {
            ExternalError::permanent(SERVICE, operation, format!("payload is not base64: {e}"))
        })?;
    String::from_utf8(decoded).map(Zeroizing::new).map_err(|e| {
        drop(Zeroizing::new(e.into_bytes()));
        ExternalError::permanent(SERVICE, operation, "payload is not valid UTF-8")
    })
}

#[async_trait]
impl SecretStore for SecretManagerRest {
    async fn add_version(&self, secret_name: &str, payload: &str) -> Result<u64, ExternalError> {
        let span = Self::span("add_version", secret_name);
        let tracker = OperationTracker::new(span.clone(), SERVICE, "add_version");

        let result: Result<u64, ExternalError> = async {
            // Secret Manager expects base64-encoded data
            let encoded = Zeroizing::new(general_purpose::STANDARD.encode(payload.as_bytes()));

            let version = match self.try_add_version(secret_name, &encoded).await? {
                AddOutcome::Added(version) => version,
                AddOutcome::SecretMissing => {
                    info!("Secret {} does not exist, creating it", secret_name);
                    self.create_secret(secret_name).await?;
                    match self.try_add_version(secret_name, &encoded).await? {
                        AddOutcome::Added(version) => version,
                        AddOutcome::SecretMissing => {
                            return Err(ExternalError::permanent_status(
                                SERVICE,
                                "add_version",
                                404,
                                format!("secret {secret_name} not found after creating it"),
                            ));
                        }
                    }
                }
            };
            debug!(version, "Added secret version");
            Ok(version)
        }
        .instrument(span)
        .await;
        tracker.finish(result)
    }

    async fn list_versions(&self, secret_name: &str) -> Result<Vec<SecretRecord>, ExternalError> {
        let span = Self::span("list_versions", secret_name);
        let tracker = OperationTracker::new(span.clone(), SERVICE, "list_versions");

        let result: Result<Vec<SecretRecord>, ExternalError> = async {
            let mut records = Vec::new();
            let mut page_token: Option<String> = None;
            loop {
                let page_size = SECRET_VERSIONS_PAGE_SIZE.to_string();
                let mut request = self
                    .http
                    .make_request(
                        Method::GET,
                        &format!("{}/versions", self.secret_path(secret_name)),
                        None,
                    )
                    .query(&[("pageSize", page_size.as_str())]);
                if let Some(token) = &page_token {
                    request = request.query(&[("pageToken", token.as_str())]);
                }
                let response = self.http.send(request, SERVICE, "list_versions").await?;

                if response.status() == StatusCode::NOT_FOUND {
                    debug!("Secret {} does not exist, no versions", secret_name);
                    return Ok(Vec::new());
                }
                if !response.status().is_success() {
                    return Err(error_from_response(response, SERVICE, "list_versions").await);
                }

                let page: ListSecretVersionsResponse =
                    GcpHttp::read_json(response, SERVICE, "list_versions").await?;
                for version in page.versions {
                    let Some(version_id) = parse_version_id(&version.name) else {
                        debug!(name = %version.name, "Skipping version with unexpected name");
                        continue;
                    };
                    records.push(SecretRecord {
                        version_id,
                        state: VersionState::parse(&version.state),
                        created_at: version.create_time,
                    });
                }

                match page.next_page_token.filter(|t| !t.is_empty()) {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }
            sort_newest_first(&mut records);
            Ok(records)
        }
        .instrument(span)
        .await;
        tracker.finish(result)
    }

    async fn disable_version(
        &self,
        secret_name: &str,
        version_id: u64,
    ) -> Result<(), ExternalError> {
        let span = Self::span("disable_version", secret_name);
        let tracker = OperationTracker::new(span.clone(), SERVICE, "disable_version");

        let result: Result<(), ExternalError> = async {
            let request = self.http.make_request(
                Method::POST,
                &format!(
                    "{}:disable",
                    self.version_path(secret_name, &version_id.to_string())
                ),
                Some(serde_json::json!({})),
            );
            let response = self.http.send(request, SERVICE, "disable_version").await?;
            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            let error_text = response.text().await.unwrap_or_default();
            // Disabling a version that is not ENABLED fails with FAILED_PRECONDITION
            if api_status(&error_text).as_deref() == Some("FAILED_PRECONDITION") {
                let current = self.get_version(secret_name, version_id).await?;
                if VersionState::parse(&current.state) != VersionState::Enabled {
                    debug!(version = version_id, state = %current.state, "Version already disabled");
                    return Ok(());
                }
            }
            Err(handle_error_response(
                SERVICE,
                "disable_version",
                status,
                &error_text,
            ))
        }
        .instrument(span)
        .await;
        tracker.finish(result)
    }

    async fn access_version(
        &self,
        secret_name: &str,
        version_id: u64,
    ) -> Result<Zeroizing<String>, ExternalError> {
        let span = Self::span("access_version", secret_name);
        let tracker = OperationTracker::new(span.clone(), SERVICE, "access_version");

        let result: Result<Zeroizing<String>, ExternalError> = async {
            self.access(secret_name, &version_id.to_string(), "access_version")
                .await?
                .ok_or_else(|| {
                    ExternalError::permanent_status(
                        SERVICE,
                        "access_version",
                        404,
                        format!("version {version_id} of {secret_name} not found"),
                    )
                })
        }
        .instrument(span)
        .await;
        tracker.finish(result)
    }

    async fn access_latest(
        &self,
        secret_name: &str,
    ) -> Result<Option<Zeroizing<String>>, ExternalError> {
        let span = Self::span("access_latest", secret_name);
        let tracker = OperationTracker::new(span.clone(), SERVICE, "access_latest");

        let result = self
            .access(secret_name, "latest", "access_latest")
            .instrument(span)
            .await;
        tracker.finish(result)
    }

    async fn secret_exists(&self, secret_name: &str) -> Result<bool, ExternalError> {
        let span = Self::span("get_secret", secret_name);
        let tracker = OperationTracker::new(span.clone(), SERVICE, "get_secret");

        let result: Result<bool, ExternalError> = async {
            let request = self
                .http
                .make_request(Method::GET, &self.secret_path(secret_name), None);
            let response = self.http.send(request, SERVICE, "get_secret").await?;
            match response.status() {
                status if status.is_success() => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                _ => Err(error_from_response(response, SERVICE, "get_secret").await),
            }
        }
        .instrument(span)
        .await;
        tracker.finish(result)
    }
}
