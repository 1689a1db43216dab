//! GCS bucket metadata lookup (`GET storage/v1/b/{bucket}`)

use super::client::{error_from_response, GcpHttp};
use crate::error::{ExternalError, Service};
use crate::provider::common::OperationTracker;
use crate::provider::{ResourceInfo, ResourceProbe};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug_span, Instrument};

const SERVICE: Service = Service::Storage;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketMetadata {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub storage_class: Option<String>,
}

/// Bucket probe used by the access verifier
#[derive(Debug, Clone)]
pub struct StorageBucketRest {
    http: GcpHttp,
}

impl StorageBucketRest {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Result<Self, ExternalError> {
        Ok(Self {
            http: GcpHttp::new(base_url, access_token, SERVICE)?,
        })
    }
}

#[async_trait]
impl ResourceProbe for StorageBucketRest {
    async fn probe(&self, resource_name: &str) -> Result<ResourceInfo, ExternalError> {
        let span = debug_span!(
            "gcp.storage.bucket.get",
            bucket = %resource_name,
            operation.name = tracing::field::Empty,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.class = tracing::field::Empty,
            error.message = tracing::field::Empty,
        );
        let tracker = OperationTracker::new(span.clone(), SERVICE, "get_bucket");

        let result: Result<ResourceInfo, ExternalError> = async {
            let request = self.http.make_request(
                Method::GET,
                &format!("storage/v1/b/{resource_name}"),
                None,
            );
            let response = self.http.send(request, SERVICE, "get_bucket").await?;
            if !response.status().is_success() {
                return Err(error_from_response(response, SERVICE, "get_bucket").await);
            }
            let bucket: BucketMetadata = GcpHttp::read_json(response, SERVICE, "get_bucket").await?;
            Ok(ResourceInfo {
                name: bucket.name,
                location: bucket.location,
                storage_class: bucket.storage_class,
            })
        }
        .instrument(span)
        .await;
        tracker.finish(result)
    }
}
