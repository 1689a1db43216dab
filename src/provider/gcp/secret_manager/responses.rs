//! # Response Types
//!
//! GCP Secret Manager REST API response structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Replication configuration for a secret
#[derive(Debug, Serialize, Deserialize)]
pub struct Replication {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic: Option<AutomaticReplication>,
}

/// Automatic replication configuration
#[derive(Debug, Serialize, Deserialize)]
pub struct AutomaticReplication {}

/// Secret payload data, base64-encoded
#[derive(Serialize, Deserialize)]
pub struct SecretPayload {
    pub data: String,
}

impl std::fmt::Debug for SecretPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretPayload").field("data", &"***").finish()
    }
}

/// Secret version metadata
///
/// `name` has the form `projects/*/secrets/*/versions/*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretVersion {
    pub name: String,
    /// `ENABLED`, `DISABLED` or `DESTROYED`
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
}

/// Response of `GET .../versions`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSecretVersionsResponse {
    #[serde(default)]
    pub versions: Vec<SecretVersion>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Response of `GET .../versions/{version}:access`
#[derive(Debug, Deserialize)]
pub struct AccessSecretVersionResponse {
    pub name: String,
    pub payload: SecretPayload,
}
