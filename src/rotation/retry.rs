//! # Retry
//!
//! Exponential backoff with jitter for external calls.
//!
//! Every call runs under a per-call timeout. A timeout counts as a transient
//! failure. Only transient failures are retried; a permanent failure is
//! returned on the spot. Both the call and the backoff sleep stop early when
//! the run's cancellation token fires.

use crate::constants::{
    DEFAULT_CALL_TIMEOUT_SECS, DEFAULT_RETRY_INITIAL_BACKOFF_MS, DEFAULT_RETRY_MAX_ATTEMPTS,
    DEFAULT_RETRY_MAX_BACKOFF_MS, RETRY_BACKOFF_MULTIPLIER,
};
use crate::error::{ExternalError, RotationError, Service};
use crate::observability::metrics;
use crate::rotation::Phase;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per call, first try included
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_backoff: Duration,

    /// Backoff multiplier (2.0 for exponential)
    pub backoff_multiplier: f32,

    /// Upper bound on a single delay
    pub max_backoff: Duration,

    /// Timeout for one attempt
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_RETRY_INITIAL_BACKOFF_MS),
            backoff_multiplier: RETRY_BACKOFF_MULTIPLIER,
            max_backoff: Duration::from_millis(DEFAULT_RETRY_MAX_BACKOFF_MS),
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            backoff_multiplier: RETRY_BACKOFF_MULTIPLIER,
            max_backoff,
            call_timeout,
        }
    }

    /// Calculate backoff duration after the given zero-based attempt
    ///
    /// Applies ±10% jitter, capped at `max_backoff`.
    #[must_use]
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_backoff.as_millis() as f32;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let backoff_ms = base_ms * self.backoff_multiplier.powi(exponent);

        let jitter = rand::rng().random_range(0.9..=1.1);
        let jittered_ms = (backoff_ms * jitter) as u64;

        Duration::from_millis(jittered_ms).min(self.max_backoff)
    }
}

/// Why a retried call gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Permanent failure, not retried
    Permanent(ExternalError),
    /// Transient failure on every attempt
    Exhausted { attempts: u32, last: ExternalError },
    /// The run was cancelled before the call completed
    Cancelled,
}

impl CallError {
    /// Map to the run-level error for a failure inside `phase`
    #[must_use]
    pub fn into_rotation_error(self, phase: Phase) -> RotationError {
        match self {
            CallError::Permanent(e) => RotationError::External(e),
            CallError::Exhausted { attempts, last } => RotationError::RetriesExhausted {
                operation: last.operation(),
                attempts,
                last,
            },
            CallError::Cancelled => RotationError::Cancelled { phase },
        }
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Permanent(e) => write!(f, "{e}"),
            CallError::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            CallError::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Run an external call under the retry policy
///
/// `service` and `operation` label the timeout error and the retry metric.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    service: Service,
    operation: &'static str,
    mut f: F,
) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExternalError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CallError::Cancelled),
            result = tokio::time::timeout(policy.call_timeout, f()) => result,
        };

        let error = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => ExternalError::transient(
                service,
                operation,
                format!("timed out after {}ms", policy.call_timeout.as_millis()),
            ),
        };

        attempt += 1;
        if !error.is_transient() {
            return Err(CallError::Permanent(error));
        }
        if attempt >= policy.max_attempts {
            warn!(
                operation,
                attempts = attempt,
                error = %error,
                "Giving up after transient failures"
            );
            return Err(CallError::Exhausted {
                attempts: attempt,
                last: error,
            });
        }

        let backoff = policy.backoff_duration(attempt - 1);
        warn!(
            operation,
            attempt,
            max_attempts = policy.max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "Transient failure, retrying"
        );
        metrics::increment_retries(operation);

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CallError::Cancelled),
            () = tokio::time::sleep(backoff) => {
                debug!(operation, "Backoff elapsed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(100),
            Duration::from_secs(1),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = policy(5);

        let backoff_0 = policy.backoff_duration(0);
        assert!(
            backoff_0 >= Duration::from_millis(90) && backoff_0 <= Duration::from_millis(110),
            "Expected 90-110ms, got {backoff_0:?}"
        );

        let backoff_2 = policy.backoff_duration(2);
        assert!(
            backoff_2 >= Duration::from_millis(360) && backoff_2 <= Duration::from_millis(440),
            "Expected 360-440ms, got {backoff_2:?}"
        );

        assert_eq!(policy.backoff_duration(10), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(policy(0).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            &policy(3),
            &CancellationToken::new(),
            Service::SecretStore,
            "add_version",
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(ExternalError::transient(Service::SecretStore, "add_version", "HTTP 503"))
                } else {
                    Ok(7u64)
                }
            },
        )
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(
            &policy(4),
            &CancellationToken::new(),
            Service::CredentialStore,
            "create_key",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExternalError::permanent_status(
                    Service::CredentialStore,
                    "create_key",
                    403,
                    "denied",
                ))
            },
        )
        .await;

        assert!(matches!(result, Err(CallError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(
            &policy(3),
            &CancellationToken::new(),
            Service::SecretStore,
            "list_versions",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ExternalError::transient(Service::SecretStore, "list_versions", "HTTP 429"))
            },
        )
        .await;

        match result {
            Err(CallError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last.operation(), "list_versions");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            &policy(2),
            &CancellationToken::new(),
            Service::CredentialStore,
            "list_keys",
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok::<_, ExternalError>("ok")
            },
        )
        .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = retry_with_backoff(
            &policy(3),
            &cancel,
            Service::SecretStore,
            "add_version",
            || async { Ok::<_, ExternalError>(1) },
        )
        .await;
        assert_eq!(result, Err(CallError::Cancelled));
    }

    #[test]
    fn test_into_rotation_error() {
        let last = ExternalError::transient(Service::SecretStore, "add_version", "HTTP 503");
        let err = CallError::Exhausted { attempts: 4, last }.into_rotation_error(Phase::PersistSecret);
        assert!(matches!(
            err,
            RotationError::RetriesExhausted {
                operation: "add_version",
                attempts: 4,
                ..
            }
        ));

        let err = CallError::Cancelled.into_rotation_error(Phase::Verify);
        assert!(matches!(err, RotationError::Cancelled { phase: Phase::Verify }));
    }
}
