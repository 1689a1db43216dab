//! # Constants
//!
//! Shared constants used throughout the rotator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default secret id used when `SECRET_NAME` is not set
pub const DEFAULT_SECRET_NAME: &str = "gcs-hmac-key";

/// Default number of enabled secret versions to keep (inclusive of the newest one)
pub const DEFAULT_RETENTION_COUNT: usize = 2;

/// Default deadline for a whole rotation run (seconds)
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 300;

/// Default timeout for a single external API call (seconds)
/// A call that exceeds it is classified as a transient failure
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

/// Default number of attempts per external call (first try included)
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 4;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_RETRY_INITIAL_BACKOFF_MS: u64 = 500;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_RETRY_MAX_BACKOFF_MS: u64 = 10_000;

/// Multiplier applied to the backoff after every failed attempt
pub const RETRY_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Exit code reported when the run succeeded but cleanup was incomplete
pub const DEFAULT_WARNINGS_EXIT_CODE: i32 = 0;

/// Exit code reported when the run failed
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Public GCS JSON API endpoint
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";

/// Public Secret Manager REST endpoint
pub const DEFAULT_SECRET_MANAGER_ENDPOINT: &str = "https://secretmanager.googleapis.com";

/// GCE/GKE metadata server base URL
pub const METADATA_SERVER_URL: &str = "http://metadata.google.internal/computeMetadata/v1";

/// Page size requested when listing secret versions
pub const SECRET_VERSIONS_PAGE_SIZE: u32 = 100;

/// Label values attached to secrets created by the rotator
pub const SECRET_LABEL_PURPOSE: &str = "gcs-hmac-key";
pub const SECRET_LABEL_MANAGED_BY: &str = "hmac-key-rotator";
