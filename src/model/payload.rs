//! # Rotation Payload
//!
//! JSON document stored in each secret version. Consumers of the secret read
//! `access_id` and `secret_key`; the remaining fields describe the rotation
//! that produced it.

use super::sensitive::SecretValue;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPayload {
    pub access_id: String,
    pub secret_key: SecretValue,
    pub service_account_email: String,
    /// Key creation time reported by GCS (RFC 3339)
    pub created_time: String,
    /// When this rotation persisted the key (RFC 3339)
    pub rotation_time: String,
    pub rotation_run_id: String,
    pub bucket_name: String,
    pub project_id: String,
}

impl RotationPayload {
    #[allow(clippy::too_many_arguments, reason = "one argument per payload field")]
    pub fn new(
        access_id: impl Into<String>,
        secret_key: SecretValue,
        service_account_email: impl Into<String>,
        created_at: DateTime<Utc>,
        issued_at: DateTime<Utc>,
        run_id: impl Into<String>,
        bucket_name: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            access_id: access_id.into(),
            secret_key,
            service_account_email: service_account_email.into(),
            created_time: created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            rotation_time: issued_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            rotation_run_id: run_id.into(),
            bucket_name: bucket_name.into(),
            project_id: project_id.into(),
        }
    }

    /// Serialize for storage. The result holds the secret in clear text.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Only the fields needed to find which key a version points at.
/// The secret is skipped by serde and never materialized.
#[derive(Deserialize)]
struct AccessIdView {
    access_id: Option<String>,
    hmac_credentials: Option<LegacyCredentials>,
}

#[derive(Deserialize)]
struct LegacyCredentials {
    access_id: Option<String>,
}

/// Extract the access id a stored payload references.
///
/// Accepts the flat layout written by this crate and the nested
/// `hmac_credentials` layout written by earlier rotators. Returns `None` when
/// the payload is not JSON or carries no access id.
#[must_use]
pub fn referenced_access_id(raw: &str) -> Option<String> {
    let view: AccessIdView = serde_json::from_str(raw).ok()?;
    view.access_id
        .or_else(|| view.hmac_credentials.and_then(|c| c.access_id))
        .filter(|id| !id.trim().is_empty())
}

#[derive(Deserialize)]
struct RunIdView {
    rotation_run_id: Option<String>,
}

/// Id of the rotation run that wrote a stored payload, `None` for payloads
/// that are not JSON or predate run ids.
#[must_use]
pub fn payload_run_id(raw: &str) -> Option<String> {
    let view: RunIdView = serde_json::from_str(raw).ok()?;
    view.rotation_run_id.filter(|id| !id.trim().is_empty())
}
