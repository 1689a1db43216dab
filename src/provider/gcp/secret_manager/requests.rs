//! # Request Types
//!
//! GCP Secret Manager REST API request structures.
//!
//! API reference: https://cloud.google.com/secret-manager/docs/reference/rest

use serde::Serialize;
use std::collections::BTreeMap;

use super::responses::{AutomaticReplication, Replication, SecretPayload};
use crate::constants::{SECRET_LABEL_MANAGED_BY, SECRET_LABEL_PURPOSE};

/// Request body for `POST /v1/projects/{project}/secrets?secretId={id}`
///
/// The secret id travels in the query string; the body only carries
/// replication and labels.
#[derive(Debug, Serialize)]
pub struct CreateSecretRequest {
    pub replication: Replication,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl CreateSecretRequest {
    /// Automatic replication plus the rotator's labels
    pub fn new(bucket: Option<&str>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert("purpose".to_string(), SECRET_LABEL_PURPOSE.to_string());
        labels.insert("managed-by".to_string(), SECRET_LABEL_MANAGED_BY.to_string());
        if let Some(bucket) = bucket.map(label_value).filter(|v| !v.is_empty()) {
            labels.insert("bucket".to_string(), bucket);
        }

        Self {
            replication: Replication {
                automatic: Some(AutomaticReplication {}),
            },
            labels,
        }
    }
}

/// Request body for `POST .../secrets/{secret}:addVersion`
///
/// `data` must already be base64-encoded.
#[derive(Debug, Serialize)]
pub struct AddVersionRequest {
    pub payload: SecretPayload,
}

impl AddVersionRequest {
    pub fn new(data: String) -> Self {
        Self {
            payload: SecretPayload { data },
        }
    }
}

/// Make a string usable as a label value: lowercase, `[a-z0-9_-]`, at most 63 chars
#[must_use]
pub fn label_value(raw: &str) -> String {
    raw.chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(63)
        .collect()
}
