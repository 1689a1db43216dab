//! GCS HMAC Key Rotator Library
//!
//! Rotates the HMAC key of a service account and keeps it in Google Cloud
//! Secret Manager. One run mints a new key, stores it as a new secret
//! version, disables versions beyond the retention count and deactivates keys
//! no retained version references.
//!
//! Tests are included in the module files and under `tests/`.

pub mod config;
pub mod constants;
pub mod error;
pub mod model;
pub mod observability;
pub mod provider;
pub mod rotation;
pub mod runtime;
pub mod verifier;

pub use config::{RotationRequest, RotatorConfig};
pub use error::{CleanupFailure, ConfigError, ExternalError, RotationError, VerifyError};
pub use rotation::{RotationEngine, RotationOutcome, RunStatus};
