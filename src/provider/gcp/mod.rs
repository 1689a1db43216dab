//! # GCP Clients
//!
//! REST clients for the Google APIs a rotation touches.
//!
//! - [`HmacKeysRest`] - GCS HMAC keys (the credential store)
//! - [`SecretManagerRest`] - Secret Manager (the secret store)
//! - [`StorageBucketRest`] - GCS bucket metadata (the resource probe)
//! - [`MetadataServer`] - access token and project id discovery
//!
//! Every client takes its base URL so tests can point it at a Pact mock server.

pub mod auth;
pub mod client;
pub mod hmac_keys;
pub mod secret_manager;
pub mod storage;

pub use auth::{resolve_access_token, resolve_project_id, MetadataServer};
pub use hmac_keys::HmacKeysRest;
pub use secret_manager::SecretManagerRest;
pub use storage::StorageBucketRest;

