//! # Errors
//!
//! Error taxonomy for a rotation run.
//!
//! - [`ConfigError`] - invalid configuration, detected before any external call
//! - [`VerifyError`] - preconditions not met, detected before any mutation
//! - [`ExternalError`] - a single call to the credential or secret store failed,
//!   classified as transient (retryable) or permanent
//! - [`RotationError`] - why a whole run ended in `Failure`
//! - [`CleanupFailure`] - one failed prune/deactivate item, reported as a warning
//!
//! None of these types ever carry the HMAC secret or a serialized payload.

use crate::rotation::Phase;
use std::fmt;
use thiserror::Error;

/// Invalid configuration. Fatal and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("retention count must be at least 1, got {0}")]
    RetentionCount(usize),

    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Precondition failures raised by the access verifier.
#[derive(Debug, Clone, Error)]
pub enum VerifyError {
    #[error("storage resource '{resource}' is unreachable: {source}")]
    ResourceUnreachable {
        resource: String,
        #[source]
        source: ExternalError,
    },

    #[error("secret '{secret}' is inaccessible: {source}")]
    SecretInaccessible {
        secret: String,
        #[source]
        source: ExternalError,
    },
}

/// The external service an [`ExternalError`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// GCS HMAC key API
    CredentialStore,
    /// GCP Secret Manager
    SecretStore,
    /// GCS bucket metadata
    Storage,
    /// Metadata server / token endpoint
    Auth,
}

impl Service {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::CredentialStore => "credential_store",
            Service::SecretStore => "secret_store",
            Service::Storage => "storage",
            Service::Auth => "auth",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call to an external service.
///
/// Only [`ExternalError::Transient`] is eligible for retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalError {
    /// Rate limiting, timeouts, 5xx responses, connection failures
    #[error("transient {service} failure during {operation}: {message}")]
    Transient {
        service: Service,
        operation: &'static str,
        message: String,
    },

    /// Permission denied, not found, invalid request
    #[error("permanent {service} failure during {operation}: {message}")]
    Permanent {
        service: Service,
        operation: &'static str,
        message: String,
        status: Option<u16>,
    },
}

impl ExternalError {
    pub fn transient(service: Service, operation: &'static str, message: impl Into<String>) -> Self {
        Self::Transient {
            service,
            operation,
            message: message.into(),
        }
    }

    pub fn permanent(service: Service, operation: &'static str, message: impl Into<String>) -> Self {
        Self::Permanent {
            service,
            operation,
            message: message.into(),
            status: None,
        }
    }

    /// Permanent failure that came with an HTTP status
    pub fn permanent_status(
        service: Service,
        operation: &'static str,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::Permanent {
            service,
            operation,
            message: message.into(),
            status: Some(status),
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    #[must_use]
    pub fn service(&self) -> Service {
        match self {
            Self::Transient { service, .. } | Self::Permanent { service, .. } => *service,
        }
    }

    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Transient { operation, .. } | Self::Permanent { operation, .. } => operation,
        }
    }

    /// HTTP status of a permanent failure, if one was returned
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Permanent { status, .. } => *status,
            Self::Transient { .. } => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Short label for metrics
    #[must_use]
    pub fn class(&self) -> &'static str {
        if self.is_transient() {
            "transient"
        } else {
            "permanent"
        }
    }
}

/// Why a rotation run failed.
#[derive(Debug, Clone, Error)]
pub enum RotationError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("verification failed: {0}")]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    External(#[from] ExternalError),

    #[error("{operation} still failing after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        last: ExternalError,
    },

    #[error("run cancelled during {phase}")]
    Cancelled { phase: Phase },

    #[error("failed to encode secret payload: {0}")]
    Payload(String),
}

impl RotationError {
    /// True when the run failed before any state was mutated
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Verify(_))
    }
}

/// Which cleanup step a [`CleanupFailure`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupKind {
    /// Disabling an old secret version
    DisableVersion,
    /// Deactivating an old HMAC key
    DeactivateKey,
    /// Listing or reading state needed to plan cleanup
    Inspect,
    /// Cleanup abandoned because the run was cancelled
    Abandoned,
}

impl CleanupKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupKind::DisableVersion => "disable_version",
            CleanupKind::DeactivateKey => "deactivate_key",
            CleanupKind::Inspect => "inspect",
            CleanupKind::Abandoned => "abandoned",
        }
    }
}

/// One cleanup action that did not complete. Non-fatal once persistence succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub kind: CleanupKind,
    /// Version id or access id the action targeted
    pub target: String,
    pub message: String,
}

impl CleanupFailure {
    pub fn new(kind: CleanupKind, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind.as_str(), self.target, self.message)
    }
}
