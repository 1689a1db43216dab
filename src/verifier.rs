//! # Access Verifier
//!
//! Read-only precondition checks run before a key is minted.
//!
//! - The bucket must answer a metadata lookup.
//! - The secret must exist or be absent. A missing secret is fine since the
//!   first write creates it; a permission failure is not.

use crate::error::{ExternalError, Service, VerifyError};
use crate::provider::{ResourceProbe, SecretStore};
use crate::rotation::{retry_with_backoff, CallError, RetryPolicy};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

pub struct AccessVerifier {
    probe: Arc<dyn ResourceProbe>,
    secrets: Arc<dyn SecretStore>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for AccessVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessVerifier")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl AccessVerifier {
    pub fn new(
        probe: Arc<dyn ResourceProbe>,
        secrets: Arc<dyn SecretStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            probe,
            secrets,
            retry,
        }
    }

    /// Check the bucket and the secret
    ///
    /// # Errors
    /// `ResourceUnreachable` when the bucket lookup fails, `SecretInaccessible`
    /// when the secret cannot be checked.
    pub async fn verify(
        &self,
        resource_name: &str,
        secret_name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), VerifyError> {
        let span = info_span!("rotation.verify", bucket = %resource_name, secret = %secret_name);
        async {
            let info = retry_with_backoff(&self.retry, cancel, Service::Storage, "get_bucket", || {
                self.probe.probe(resource_name)
            })
            .await
            .map_err(|e| VerifyError::ResourceUnreachable {
                resource: resource_name.to_string(),
                source: into_external(e, Service::Storage, "get_bucket"),
            })?;
            info!(
                bucket = %info.name,
                location = info.location.as_deref().unwrap_or("unknown"),
                storage_class = info.storage_class.as_deref().unwrap_or("unknown"),
                "Bucket is reachable"
            );

            let exists = retry_with_backoff(
                &self.retry,
                cancel,
                Service::SecretStore,
                "get_secret",
                || self.secrets.secret_exists(secret_name),
            )
            .await
            .map_err(|e| VerifyError::SecretInaccessible {
                secret: secret_name.to_string(),
                source: into_external(e, Service::SecretStore, "get_secret"),
            })?;
            if exists {
                info!("Secret exists");
            } else {
                info!("Secret does not exist yet, it will be created on first write");
            }
            Ok::<(), VerifyError>(())
        }
        .instrument(span)
        .await
    }
}

fn into_external(error: CallError, service: Service, operation: &'static str) -> ExternalError {
    match error {
        CallError::Permanent(e) | CallError::Exhausted { last: e, .. } => e,
        CallError::Cancelled => ExternalError::transient(service, operation, "cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SecretRecord;
    use crate::provider::ResourceInfo;
    use async_trait::async_trait;
    use std::time::Duration;
    use zeroize::Zeroizing;

    struct Probe(Result<ResourceInfo, ExternalError>);

    #[async_trait]
    impl ResourceProbe for Probe {
        async fn probe(&self, _resource_name: &str) -> Result<ResourceInfo, ExternalError> {
            self.0.clone()
        }
    }

    struct Secrets(Result<bool, ExternalError>);

    #[async_trait]
    impl SecretStore for Secrets {
        async fn add_version(&self, _: &str, _: &str) -> Result<u64, ExternalError> {
            unreachable!("verifier must not write")
        }
        async fn list_versions(&self, _: &str) -> Result<Vec<SecretRecord>, ExternalError> {
            Ok(Vec::new())
        }
        async fn disable_version(&self, _: &str, _: u64) -> Result<(), ExternalError> {
            unreachable!("verifier must not write")
        }
        async fn access_version(&self, _: &str, _: u64) -> Result<Zeroizing<String>, ExternalError> {
            Ok(Zeroizing::new(String::new()))
        }
        async fn access_latest(&self, _: &str) -> Result<Option<Zeroizing<String>>, ExternalError> {
            Ok(None)
        }
        async fn secret_exists(&self, _: &str) -> Result<bool, ExternalError> {
            self.0.clone()
        }
    }

    fn verifier(
        probe: Result<ResourceInfo, ExternalError>,
        secret: Result<bool, ExternalError>,
    ) -> AccessVerifier {
        AccessVerifier::new(
            Arc::new(Probe(probe)),
            Arc::new(Secrets(secret)),
            RetryPolicy::new(
                2,
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_secs(1),
            ),
        )
    }

    fn bucket() -> ResourceInfo {
        ResourceInfo {
            name: "data-bucket".to_string(),
            location: Some("EU".to_string()),
            storage_class: Some("STANDARD".to_string()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_secret_is_ok() {
        let result = verifier(Ok(bucket()), Ok(false))
            .verify("data-bucket", "gcs-hmac-key", &CancellationToken::new())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_bucket_is_unreachable() {
        let missing = ExternalError::permanent_status(Service::Storage, "get_bucket", 404, "not found");
        let result = verifier(Err(missing), Ok(true))
            .verify("data-bucket", "gcs-hmac-key", &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(VerifyError::ResourceUnreachable { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_secret_is_inaccessible() {
        let denied = ExternalError::permanent_status(Service::SecretStore, "get_secret", 403, "denied");
        let result = verifier(Ok(bucket()), Err(denied))
            .verify("data-bucket", "gcs-hmac-key", &CancellationToken::new())
            .await;
        match result {
            Err(VerifyError::SecretInaccessible { secret, source }) => {
                assert_eq!(secret, "gcs-hmac-key");
                assert_eq!(source.status(), Some(403));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
