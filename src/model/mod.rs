//! # Model
//!
//! Domain types shared by the store clients and the rotation engine.

pub mod credential;
pub mod payload;
pub mod secret;
pub mod sensitive;

pub use credential::{Credential, CredentialStatus};
pub use payload::{payload_run_id, referenced_access_id, RotationPayload};
pub use secret::{SecretRecord, VersionState};
pub use sensitive::SecretValue;
