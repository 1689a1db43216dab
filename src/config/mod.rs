//! # Configuration
//!
//! - `rotator`: process-level settings loaded from environment variables
//! - `request`: the validated invocation contract handed to the rotation engine

pub mod request;
pub mod rotator;

pub use request::RotationRequest;
pub use rotator::{LogFormat, RotatorConfig};
