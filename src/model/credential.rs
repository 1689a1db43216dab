//! # Credential
//!
//! One GCS HMAC key as seen by the rotator.

use super::sensitive::SecretValue;
use chrono::{DateTime, Utc};
use std::fmt;

/// Key state at the origin system
///
/// Keys reported as `DELETED` never reach the engine; the client drops them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialStatus {
    Active,
    Inactive,
}

impl CredentialStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Active => "ACTIVE",
            CredentialStatus::Inactive => "INACTIVE",
        }
    }

    /// Parse the API representation, `None` for states the rotator ignores
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(CredentialStatus::Active),
            "INACTIVE" => Some(CredentialStatus::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HMAC key pair
///
/// `secret` is only populated on the value returned by key creation; listings
/// never include it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_id: String,
    pub secret: Option<SecretValue>,
    /// Service account email the key is issued for
    pub owner: String,
    pub status: CredentialStatus,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == CredentialStatus::Active
    }

    /// Copy of the key without its secret half
    #[must_use]
    pub fn metadata(&self) -> Self {
        Self {
            secret: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        assert_eq!(CredentialStatus::parse("ACTIVE"), Some(CredentialStatus::Active));
        assert_eq!(CredentialStatus::parse("INACTIVE"), Some(CredentialStatus::Inactive));
        assert_eq!(CredentialStatus::parse("DELETED"), None);
    }

    #[test]
    fn test_metadata_drops_secret() {
        let key = Credential {
            access_id: "GOOG1EXAMPLE".to_string(),
            secret: Some(SecretValue::new("s3cr3t")),
            owner: "sa@p.iam.gserviceaccount.com".to_string(),
            status: CredentialStatus::Active,
            created_at: Utc::now(),
        };
        assert!(key.metadata().secret.is_none());
        assert!(!format!("{key:?}").contains("s3cr3t"));
    }
}
