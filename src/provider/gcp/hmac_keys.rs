//! GCS HMAC key REST client
//!
//! Implements [`CredentialStore`] on the GCS JSON API:
//! - `POST storage/v1/projects/{project}/hmacKeys?serviceAccountEmail=...`
//! - `GET  storage/v1/projects/{project}/hmacKeys?serviceAccountEmail=...`
//! - `GET  storage/v1/projects/{project}/hmacKeys/{accessId}`
//! - `PUT  storage/v1/projects/{project}/hmacKeys/{accessId}`
//!
//! References:
//! - [HmacKeys](https://cloud.google.com/storage/docs/json_api/v1/projects/hmacKeys)

use super::client::{error_from_response, GcpHttp};
use crate::error::{ExternalError, Service};
use crate::model::{Credential, CredentialStatus, SecretValue};
use crate::provider::common::OperationTracker;
use crate::provider::CredentialStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, Instrument};

const SERVICE: Service = Service::CredentialStore;

/// `storage#hmacKeyMetadata`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HmacKeyMetadata {
    pub access_id: String,
    #[serde(default)]
    pub service_account_email: String,
    /// `ACTIVE`, `INACTIVE` or `DELETED`
    pub state: String,
    pub time_created: DateTime<Utc>,
    #[serde(default)]
    pub etag: Option<String>,
}

/// `storage#hmacKey`, returned once on creation
#[derive(Debug, Deserialize)]
pub struct HmacKeyCreated {
    pub metadata: HmacKeyMetadata,
    pub secret: SecretValue,
}

/// `storage#hmacKeysMetadata`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HmacKeyList {
    #[serde(default)]
    pub items: Vec<HmacKeyMetadata>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateHmacKeyRequest {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl HmacKeyMetadata {
    /// `None` for deleted keys
    fn into_credential(self, secret: Option<SecretValue>) -> Option<Credential> {
        let status = CredentialStatus::parse(&self.state)?;
        Some(Credential {
            access_id: self.access_id,
            secret,
            owner: self.service_account_email,
            status,
            created_at: self.time_created,
        })
    }
}

/// GCS HMAC key client
#[derive(Debug, Clone)]
pub struct HmacKeysRest {
    http: GcpHttp,
    project_id: String,
}

impl HmacKeysRest {
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
        })
    }

    fn keys_path(&self) -> String {
        format!("storage/v1/projects/{}/hmacKeys", self.project_id)
    }

    fn key_path(&self, access_id: &str) -> String {
        format!("{}/{}", self.keys_path(), access_id)
    }

    async fn get_key(&self, access_id: &str) -> Result<HmacKeyMetadata, ExternalError> {
        let request = self.http.make_request(Method::GET, &self.key_path(access_id), None);
        let response = self.http.send(request, SERVICE, "get_key").await?;
        if !response.status().is_success() {
            return Err(error_from_response(response, SERVICE, "get_key").await);
        }
        GcpHttp::read_json(response, SERVICE, "get_key").await
    }
}

#[async_trait]
impl CredentialStore for HmacKeysRest {
    async fn create_credential(&self, owner: &str) -> Result<Credential, ExternalError> {
        let span = info_span!(
            "gcp.hmac_key.create",
            project.id = %self.project_id,
            service_account = %owner,
            operation.name = tracing::field::Empty,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.class = tracing::field::Empty,
            error.message = tracing::field::Empty,
        );
        let tracker = OperationTracker::new(span.clone(), SERVICE, "create_key");

        let result: Result<Credential, ExternalError> = async {
            let request = self
                .http
                .make_request(Method::POST, &self.keys_path(), None)
                .query(&[("serviceAccountEmail", owner)]);
            let response = self.http.send(request, SERVICE, "create_key").await?;
            if !response.status().is_success() {
                return Err(error_from_response(response, SERVICE, "create_key").await);
            }

            let created: HmacKeyCreated =
                GcpHttp::read_json(response, SERVICE, "create_key").await?;
            if created.secret.is_empty() {
                return Err(ExternalError::permanent(
                    SERVICE,
                    "create_key",
                    "response did not include a secret",
                ));
            }
            let state = created.metadata.state.clone();
            let credential = created
                .metadata
                .into_credential(Some(created.secret))
                .ok_or_else(|| {
                    ExternalError::permanent(
                        SERVICE,
                        "create_key",
                        format!("new key reported unexpected state {state}"),
                    )
                })?;
            info!(access_id = %credential.access_id, "Created HMAC key");
            Ok(credential)
        }
        .instrument(span)
        .await;
        tracker.finish(result)
    }

    async fn list_credentials(&self, owner: &str) -> Result<Vec<Credential>, ExternalError> {
        let span = tracing::debug_span!(
            "gcp.hmac_key.list",
            project.id = %self.project_id,
            service_account = %owner,
            operation.name = tracing::field::Empty,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.class = tracing::field::Empty,
            error.message = tracing::field::Empty,
        );
        let tracker = OperationTracker::new(span.clone(), SERVICE, "list_keys");

        let result: Result<Vec<Credential>, ExternalError> = async {
            let mut keys = Vec::new();
            let mut page_token: Option<String> = None;
            loop {
                let mut request = self
                    .http
                    .make_request(Method::GET, &self.keys_path(), None)
                    .query(&[("serviceAccountEmail", owner), ("showDeletedKeys", "false")]);
                if let Some(token) = &page_token {
                    request = request.query(&[("pageToken", token.as_str())]);
                }
                let response = self.http.send(request, SERVICE, "list_keys").await?;
                if !response.status().is_success() {
                    return Err(error_from_response(response, SERVICE, "list_keys").await);
                }
                let page: HmacKeyList = GcpHttp::read_json(response, SERVICE, "list_keys").await?;
                keys.extend(page.items.into_iter().filter_map(|m| m.into_credential(None)));

                match page.next_page_token.filter(|t| !t.is_empty()) {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }
            keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            debug!(count = keys.len(), "Listed HMAC keys");
            Ok(keys)
        }
        .instrument(span)
        .await;
        tracker.finish(result)
    }

    async fn deactivate(&self, access_id: &str) -> Result<(), ExternalError> {
        let span = info_span!(
            "gcp.hmac_key.deactivate",
            project.id = %self.project_id,
            access_id = %access_id,
            operation.name = tracing::field::Empty,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.class = tracing::field::Empty,
            error.message = tracing::field::Empty,
        );
        let tracker = OperationTracker::new(span.clone(), SERVICE, "deactivate_key");

        let result: Result<(), ExternalError> = async {
            let current = self.get_key(access_id).await?;
            if current.state != "ACTIVE" {
                debug!(state = %current.state, "Key already inactive");
                return Ok(());
            }

            let body = serde_json::to_value(UpdateHmacKeyRequest {
                state: "INACTIVE",
                etag: current.etag,
            })
            .map_err(|e| ExternalError::permanent(SERVICE, "deactivate_key", e.to_string()))?;
            let request = self
                .http
                .make_request(Method::PUT, &self.key_path(access_id), Some(body));
            let response = self.http.send(request, SERVICE, "deactivate_key").await?;
            if !response.status().is_success() {
                return Err(error_from_response(response, SERVICE, "deactivate_key").await);
            }
            Ok(())
        }
        .instrument(span)
        .await;
        tracker.finish(result)
    }
}
