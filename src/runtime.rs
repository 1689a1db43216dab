//! # Runtime
//!
//! Wiring between process configuration and the rotation engine: client
//! construction, the run deadline and exit code mapping.

use crate::config::RotatorConfig;
use crate::constants::FAILURE_EXIT_CODE;
use crate::provider::gcp::{
    resolve_access_token, resolve_project_id, HmacKeysRest, MetadataServer, SecretManagerRest,
    StorageBucketRest,
};
use crate::provider::{CredentialStore, ResourceProbe, SecretStore};
use crate::rotation::{RotationEngine, RotationOutcome, RunStatus};
use crate::verifier::AccessVerifier;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The three GCP clients a run uses
#[derive(Debug, Clone)]
pub struct GcpClients {
    pub project_id: String,
    pub hmac_keys: Arc<HmacKeysRest>,
    pub secrets: Arc<SecretManagerRest>,
    pub buckets: Arc<StorageBucketRest>,
}

impl GcpClients {
    /// Resolve credentials and project, then build the clients
    ///
    /// # Errors
    /// Returns an error when no token or project can be resolved
    pub async fn connect(config: &RotatorConfig) -> Result<Self> {
        let metadata = MetadataServer::default_endpoint()?;
        let token = resolve_access_token(config.access_token.as_deref(), &metadata).await?;
        let project_id = resolve_project_id(config.project_id.as_deref(), &metadata).await?;
        Self::with_token(config, &project_id, token.as_str())
    }

    /// Build the clients with a known token and project
    ///
    /// # Errors
    /// Returns an error when an HTTP client cannot be built
    pub fn with_token(config: &RotatorConfig, project_id: &str, token: &str) -> Result<Self> {
        let hmac_keys = HmacKeysRest::new(&config.storage_endpoint, token, project_id)
            .context("Failed to create HMAC key client")?;
        let secrets = SecretManagerRest::new(&config.secret_manager_endpoint, token, project_id)
            .context("Failed to create Secret Manager client")?
            .with_bucket_label(config.bucket_name.trim());
        let buckets = StorageBucketRest::new(&config.storage_endpoint, token)
            .context("Failed to create storage client")?;

        Ok(Self {
            project_id: project_id.to_string(),
            hmac_keys: Arc::new(hmac_keys),
            secrets: Arc::new(secrets),
            buckets: Arc::new(buckets),
        })
    }

    #[must_use]
    pub fn engine(&self, config: &RotatorConfig) -> RotationEngine {
        RotationEngine::new(
            Arc::clone(&self.hmac_keys) as Arc<dyn CredentialStore>,
            Arc::clone(&self.secrets) as Arc<dyn SecretStore>,
            Arc::clone(&self.buckets) as Arc<dyn ResourceProbe>,
            config.retry_policy(),
            self.project_id.clone(),
        )
    }

    #[must_use]
    pub fn verifier(&self, config: &RotatorConfig) -> AccessVerifier {
        AccessVerifier::new(
            Arc::clone(&self.buckets) as Arc<dyn ResourceProbe>,
            Arc::clone(&self.secrets) as Arc<dyn SecretStore>,
            config.retry_policy(),
        )
    }
}

/// Token cancelled when the run deadline passes or a shutdown signal arrives
#[must_use]
pub fn run_cancellation(config: &RotatorConfig) -> CancellationToken {
    let token = CancellationToken::new();

    let deadline = config.run_timeout_duration();
    let on_deadline = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(deadline) => {
                warn!(timeout_secs = deadline.as_secs(), "Run deadline reached, cancelling");
                on_deadline.cancel();
            }
            () = on_deadline.cancelled() => {}
        }
    });

    let on_signal = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = shutdown_signal() => {
                info!("Received shutdown signal (SIGINT/SIGTERM), cancelling run");
                on_signal.cancel();
            }
            () = on_signal.cancelled() => {}
        }
    });

    token
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Process exit code for a finished run
#[must_use]
pub fn exit_code(outcome: &RotationOutcome, warnings_exit_code: i32) -> i32 {
    match outcome.status {
        RunStatus::Success => 0,
        RunStatus::SuccessWithWarnings => warnings_exit_code,
        RunStatus::Failure => FAILURE_EXIT_CODE,
    }
}
