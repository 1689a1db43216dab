//! # Rotation Request
//!
//! The four values a rotation run needs: who owns the key, which bucket it is
//! for, where the key is stored and how many versions stay enabled.

use crate::error::ConfigError;
use regex::Regex;
use std::sync::LazyLock;

static SERVICE_ACCOUNT_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
        .expect("Failed to compile service account regex - this should never happen")
});

// Secret Manager secret ids
static SECRET_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{1,255}$")
        .expect("Failed to compile secret id regex - this should never happen")
});

// GCS bucket names (dotted names may be up to 222 characters)
static BUCKET_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9._-]{1,220}[a-z0-9]$")
        .expect("Failed to compile bucket name regex - this should never happen")
});

/// Inputs of one rotation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationRequest {
    /// Service account email the HMAC key is issued for
    pub owner_identity: String,
    /// Bucket that must be reachable before rotating
    pub storage_resource_name: String,
    /// Secret Manager secret id holding the key
    pub secret_name: String,
    /// Enabled versions kept after pruning, the newly written one included
    pub retention_count: usize,
}

impl RotationRequest {
    pub fn new(
        owner_identity: impl Into<String>,
        storage_resource_name: impl Into<String>,
        secret_name: impl Into<String>,
        retention_count: usize,
    ) -> Self {
        Self {
            owner_identity: owner_identity.into(),
            storage_resource_name: storage_resource_name.into(),
            secret_name: secret_name.into(),
            retention_count,
        }
    }

    /// Check the request before any external call is made
    ///
    /// # Errors
    /// Returns the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        let owner = self.owner_identity.trim();
        if owner.is_empty() {
            return Err(ConfigError::Empty {
                field: "owner identity",
            });
        }
        if self.storage_resource_name.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "storage resource name",
            });
        }
        if self.secret_name.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "secret name",
            });
        }
        if self.retention_count < 1 {
            return Err(ConfigError::RetentionCount(self.retention_count));
        }

        if !SERVICE_ACCOUNT_EMAIL.is_match(owner) {
            return Err(ConfigError::Invalid {
                field: "owner identity",
                reason: format!("'{owner}' is not a service account email"),
            });
        }
        if !BUCKET_NAME.is_match(&self.storage_resource_name) {
            return Err(ConfigError::Invalid {
                field: "storage resource name",
                reason: format!("'{}' is not a valid bucket name", self.storage_resource_name),
            });
        }
        if !SECRET_ID.is_match(&self.secret_name) {
            return Err(ConfigError::Invalid {
                field: "secret name",
                reason: "only letters, digits, '_' and '-' are allowed (max 255)".to_string(),
            });
        }

        Ok(())
    }
}
