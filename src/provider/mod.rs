//! # Provider Modules
//!
//! Clients for the external systems a rotation touches.
//!
//! - [`CredentialStore`] issues, lists and deactivates HMAC keys
//! - [`SecretStore`] holds the serialized key as secret versions
//! - [`ResourceProbe`] checks the target bucket before anything is mutated
//!
//! The engine only sees these traits. Errors are [`ExternalError`]s so the
//! retry layer can tell transient failures from permanent ones.

use crate::error::ExternalError;
use crate::model::{Credential, SecretRecord};
use async_trait::async_trait;
use zeroize::Zeroizing;

/// Origin system of the HMAC keys
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Mint a new ACTIVE key for `owner`; the result carries the secret
    async fn create_credential(&self, owner: &str) -> Result<Credential, ExternalError>;

    /// Keys of `owner` newest first, without secrets and without deleted keys
    async fn list_credentials(&self, owner: &str) -> Result<Vec<Credential>, ExternalError>;

    /// Set a key to INACTIVE. Already inactive keys are a no-op success.
    async fn deactivate(&self, access_id: &str) -> Result<(), ExternalError>;
}

/// Versioned secret storage
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Store `payload` as a new version, creating the secret when it does not exist
    ///
    /// Returns the new version id.
    async fn add_version(&self, secret_name: &str, payload: &str) -> Result<u64, ExternalError>;

    /// All versions newest first. A missing secret yields an empty list.
    async fn list_versions(&self, secret_name: &str) -> Result<Vec<SecretRecord>, ExternalError>;

    /// Disable a version. Already disabled versions are a no-op success.
    async fn disable_version(&self, secret_name: &str, version_id: u64)
        -> Result<(), ExternalError>;

    /// Read the payload of one version
    async fn access_version(
        &self,
        secret_name: &str,
        version_id: u64,
    ) -> Result<Zeroizing<String>, ExternalError>;

    /// Read the payload of the latest enabled version, `None` when the secret
    /// or its versions do not exist
    async fn access_latest(
        &self,
        secret_name: &str,
    ) -> Result<Option<Zeroizing<String>>, ExternalError>;

    async fn secret_exists(&self, secret_name: &str) -> Result<bool, ExternalError>;
}

/// Bucket facts logged by the verifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceInfo {
    pub name: String,
    pub location: Option<String>,
    pub storage_class: Option<String>,
}

/// Read-only reachability check for the storage resource
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    async fn probe(&self, resource_name: &str) -> Result<ResourceInfo, ExternalError>;
}

// Common utilities shared across providers
pub mod common;

// Provider implementations
pub mod gcp;
