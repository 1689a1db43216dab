//! # Rotator Configuration
//!
//! Process-level settings loaded from environment variables.
//!
//! The variable names match the ones the CronJob manifests already set
//! (`SERVICE_ACCOUNT_EMAIL`, `SECRET_NAME`, `MAX_VERSIONS_TO_KEEP`, ...).

use super::request::RotationRequest;
use crate::error::ConfigError;
use crate::constants::{
    DEFAULT_CALL_TIMEOUT_SECS, DEFAULT_RETENTION_COUNT, DEFAULT_RETRY_INITIAL_BACKOFF_MS,
    DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_RETRY_MAX_BACKOFF_MS, DEFAULT_RUN_TIMEOUT_SECS,
    DEFAULT_SECRET_MANAGER_ENDPOINT, DEFAULT_SECRET_NAME, DEFAULT_STORAGE_ENDPOINT,
    DEFAULT_WARNINGS_EXIT_CODE,
};
use crate::rotation::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.eq_ignore_ascii_case("json") {
            Ok(LogFormat::Json)
        } else if value.eq_ignore_ascii_case("text") {
            Ok(LogFormat::Text)
        } else {
            Err(())
        }
    }
}

/// Rotator configuration
///
/// Every setting except the owner identity and the bucket has a default.
#[derive(Clone)]
pub struct RotatorConfig {
    /// Service account the HMAC key belongs to
    pub service_account_email: String,
    /// Bucket checked before rotating
    pub bucket_name: String,
    /// Secret Manager secret id
    pub secret_name: String,
    /// Enabled secret versions to keep, newest included
    pub retention_count: usize,
    /// GCP project; resolved from the metadata server when unset
    pub project_id: Option<String>,
    /// Deadline for the whole run (seconds)
    pub run_timeout_secs: u64,
    /// Timeout for one external call (seconds)
    pub call_timeout_secs: u64,
    /// Attempts per external call, first try included
    pub retry_max_attempts: u32,
    /// First backoff delay (milliseconds)
    pub retry_initial_backoff_ms: u64,
    /// Backoff cap (milliseconds)
    pub retry_max_backoff_ms: u64,
    /// Exit code for SUCCESS_WITH_WARNINGS
    pub warnings_exit_code: i32,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    pub log_format: LogFormat,
    /// Write Prometheus text exposition here when the run ends
    pub metrics_textfile_path: Option<PathBuf>,
    /// Static bearer token, bypasses the metadata server
    pub access_token: Option<String>,
    pub storage_endpoint: String,
    pub secret_manager_endpoint: String,
}

impl std::fmt::Debug for RotatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatorConfig")
            .field("service_account_email", &self.service_account_email)
            .field("bucket_name", &self.bucket_name)
            .field("secret_name", &self.secret_name)
            .field("retention_count", &self.retention_count)
            .field("project_id", &self.project_id)
            .field("run_timeout_secs", &self.run_timeout_secs)
            .field("call_timeout_secs", &self.call_timeout_secs)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            service_account_email: String::new(),
            bucket_name: String::new(),
            secret_name: DEFAULT_SECRET_NAME.to_string(),
            retention_count: DEFAULT_RETENTION_COUNT,
            project_id: None,
            run_timeout_secs: DEFAULT_RUN_TIMEOUT_SECS,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_initial_backoff_ms: DEFAULT_RETRY_INITIAL_BACKOFF_MS,
            retry_max_backoff_ms: DEFAULT_RETRY_MAX_BACKOFF_MS,
            warnings_exit_code: DEFAULT_WARNINGS_EXIT_CODE,
            log_level: "INFO".to_string(),
            log_format: LogFormat::Text,
            metrics_textfile_path: None,
            access_token: None,
            storage_endpoint: DEFAULT_STORAGE_ENDPOINT.to_string(),
            secret_manager_endpoint: DEFAULT_SECRET_MANAGER_ENDPOINT.to_string(),
        }
    }
}

impl RotatorConfig {
    /// Load configuration from environment variables with defaults
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when a variable is set to a value of
    /// the wrong type
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    ///
    /// Unset and blank keys take their defaults.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for set values that do not parse
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        Ok(Self {
            service_account_email: env.string_or("SERVICE_ACCOUNT_EMAIL", ""),
            bucket_name: env.string_or("BUCKET_NAME", ""),
            secret_name: env.string_or("SECRET_NAME", DEFAULT_SECRET_NAME),
            retention_count: env.parse_or("MAX_VERSIONS_TO_KEEP", DEFAULT_RETENTION_COUNT)?,
            project_id: env.optional("PROJECT_ID"),
            run_timeout_secs: env.parse_or("RUN_TIMEOUT_SECS", DEFAULT_RUN_TIMEOUT_SECS)?,
            call_timeout_secs: env.parse_or("CALL_TIMEOUT_SECS", DEFAULT_CALL_TIMEOUT_SECS)?,
            retry_max_attempts: env.parse_or("RETRY_MAX_ATTEMPTS", DEFAULT_RETRY_MAX_ATTEMPTS)?,
            retry_initial_backoff_ms: env
                .parse_or("RETRY_INITIAL_BACKOFF_MS", DEFAULT_RETRY_INITIAL_BACKOFF_MS)?,
            retry_max_backoff_ms: env.parse_or("RETRY_MAX_BACKOFF_MS", DEFAULT_RETRY_MAX_BACKOFF_MS)?,
            warnings_exit_code: env.parse_or("WARNINGS_EXIT_CODE", DEFAULT_WARNINGS_EXIT_CODE)?,
            log_level: env.string_or("LOG_LEVEL", "INFO"),
            log_format: env.parse_or("LOG_FORMAT", LogFormat::Text)?,
            metrics_textfile_path: env.optional("METRICS_TEXTFILE_PATH").map(PathBuf::from),
            access_token: env.optional("GCP_ACCESS_TOKEN"),
            storage_endpoint: env.string_or("STORAGE_ENDPOINT", DEFAULT_STORAGE_ENDPOINT),
            secret_manager_endpoint: env
                .string_or("SECRET_MANAGER_ENDPOINT", DEFAULT_SECRET_MANAGER_ENDPOINT),
        })
    }

    /// The invocation contract handed to the engine
    #[must_use]
    pub fn request(&self) -> RotationRequest {
        RotationRequest::new(
            self.service_account_email.trim(),
            self.bucket_name.trim(),
            self.secret_name.trim(),
            self.retention_count,
        )
    }

    /// Retry policy applied to every external call
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts.max(1),
            Duration::from_millis(self.retry_initial_backoff_ms),
            Duration::from_millis(self.retry_max_backoff_ms),
            self.call_timeout_duration(),
        )
    }

    /// Get whole-run deadline duration
    #[must_use]
    pub fn run_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    /// Get per-call timeout duration
    #[must_use]
    pub fn call_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Typed reads over a key lookup
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unset and blank values both count as missing
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    /// Unset falls back to `default`, set but unparseable is an error
    fn parse_or<T: std::str::FromStr>(
        &self,
        key: &'static str,
        default: T,
    ) -> Result<T, ConfigError> {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                field: key,
                reason: format!("'{value}' is not a valid value"),
            }),
        }
    }
}
