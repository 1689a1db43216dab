//! # Rotation Engine
//!
//! Drives one run through the state machine.
//!
//! Errors up to and including PERSIST_SECRET fail the run. After the new
//! version is stored, every problem is collected as a [`CleanupFailure`] and
//! the run ends as success with warnings. A cancelled token (deadline or
//! signal) is treated the same way: before persistence it fails the run,
//! afterwards it abandons the remaining cleanup.

use super::deactivation::plan_deactivation;
use super::dry_run::RotationPlan;
use super::retention::plan_prune;
use super::retry::{retry_with_backoff, CallError, RetryPolicy};
use super::run::{MintedKey, RotationOutcome, RotationRun};
use super::Phase;
use crate::config::RotationRequest;
use crate::error::{CleanupFailure, CleanupKind, ExternalError, RotationError, Service};
use crate::model::{
    payload_run_id, referenced_access_id, Credential, RotationPayload, SecretRecord,
};
use crate::observability::metrics;
use crate::provider::{CredentialStore, ResourceProbe, SecretStore};
use crate::verifier::AccessVerifier;
use chrono::Utc;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use zeroize::Zeroizing;

pub struct RotationEngine {
    credentials: Arc<dyn CredentialStore>,
    secrets: Arc<dyn SecretStore>,
    verifier: AccessVerifier,
    retry: RetryPolicy,
    /// Recorded in every payload
    project_id: String,
}

impl std::fmt::Debug for RotationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationEngine")
            .field("retry", &self.retry)
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

/// What the retained versions say about key liveness
enum References {
    Known(BTreeSet<String>),
    /// At least one retained version could not be read or parsed
    Unknown(Vec<CleanupFailure>),
}

impl RotationEngine {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        secrets: Arc<dyn SecretStore>,
        probe: Arc<dyn ResourceProbe>,
        retry: RetryPolicy,
        project_id: impl Into<String>,
    ) -> Self {
        let verifier = AccessVerifier::new(probe, Arc::clone(&secrets), retry.clone());
        Self {
            credentials,
            secrets,
            verifier,
            retry,
            project_id: project_id.into(),
        }
    }

    /// Run one rotation to a terminal status
    pub async fn rotate(
        &self,
        request: &RotationRequest,
        cancel: CancellationToken,
    ) -> RotationOutcome {
        let mut run = RotationRun::new();
        let span = info_span!(
            "rotation.run",
            run.id = %run.run_id,
            owner = %request.owner_identity,
            secret = %request.secret_name,
            retention = request.retention_count,
        );
        let started = Instant::now();

        let result = self
            .execute(&mut run, request, &cancel)
            .instrument(span.clone())
            .await;
        if let Err(e) = result {
            run.error = Some(e);
        }

        let outcome = run.finish();
        metrics::record_run(outcome.status.as_str(), started.elapsed().as_secs_f64());
        for warning in &outcome.warnings {
            metrics::increment_cleanup_failures(warning.kind.as_str());
        }
        if outcome.phase_reached.is_after_persist() {
            metrics::set_last_success_timestamp(Utc::now().timestamp());
        }

        span.in_scope(|| match &outcome.error {
            Some(e) => error!(
                phase = %outcome.phase_reached,
                precondition = e.is_precondition(),
                error = %e,
                "Rotation failed"
            ),
            None if outcome.warnings.is_empty() => info!("Rotation completed"),
            None => warn!(
                warnings = outcome.warnings.len(),
                "Rotation completed with incomplete cleanup"
            ),
        });
        outcome
    }

    async fn execute(
        &self,
        run: &mut RotationRun,
        request: &RotationRequest,
        cancel: &CancellationToken,
    ) -> Result<(), RotationError> {
        request.validate()?;

        run.enter(Phase::Verify);
        let timer = Instant::now();
        self.verify(request, cancel).await?;
        observe(Phase::Verify, timer);

        run.enter(Phase::MintCredential);
        let timer = Instant::now();
        let credential = self
            .call(cancel, Service::CredentialStore, "create_key", Phase::MintCredential, || {
                self.credentials.create_credential(&request.owner_identity)
            })
            .await?;
        run.new_credential = Some(MintedKey {
            access_id: credential.access_id.clone(),
            created_at: credential.created_at,
        });
        info!(access_id = %credential.access_id, "Minted new HMAC key");
        observe(Phase::MintCredential, timer);

        run.enter(Phase::PersistSecret);
        let timer = Instant::now();
        let version = self.persist(run, request, &credential, cancel).await?;
        run.new_version = Some(version);
        info!(version, access_id = %credential.access_id, "Stored new key in Secret Manager");
        observe(Phase::PersistSecret, timer);

        // From here on nothing fails the run.
        run.enter(Phase::PruneVersions);
        let timer = Instant::now();
        let retained = self.prune(run, request, version, cancel).await;
        observe(Phase::PruneVersions, timer);

        let Some(retained) = retained else {
            return Ok(());
        };

        run.enter(Phase::DeactivateOldKeys);
        let timer = Instant::now();
        self.deactivate(run, request, &retained, &credential, cancel)
            .await;
        observe(Phase::DeactivateOldKeys, timer);

        Ok(())
    }

    async fn verify(
        &self,
        request: &RotationRequest,
        cancel: &CancellationToken,
    ) -> Result<(), RotationError> {
        match self
            .verifier
            .verify(&request.storage_resource_name, &request.secret_name, cancel)
            .await
        {
            Ok(()) => Ok(()),
            Err(_) if cancel.is_cancelled() => Err(RotationError::Cancelled {
                phase: Phase::Verify,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(
        &self,
        run: &RotationRun,
        request: &RotationRequest,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<u64, RotationError> {
        let secret = credential
            .secret
            .clone()
            .ok_or_else(|| RotationError::Payload("new key was returned without a secret".into()))?;
        let payload = RotationPayload::new(
            credential.access_id.clone(),
            secret,
            request.owner_identity.clone(),
            credential.created_at,
            Utc::now(),
            run.run_id.to_string(),
            request.storage_resource_name.clone(),
            self.project_id.clone(),
        );
        let json = Zeroizing::new(
            payload
                .to_json()
                .map_err(|e| RotationError::Payload(e.to_string()))?,
        );

        let secret_name = request.secret_name.as_str();
        let body = json.as_str();
        let run_id = run.run_id.to_string();
        let run_id = run_id.as_str();
        let attempted = AtomicBool::new(false);
        let attempted = &attempted;

        self.call(
            cancel,
            Service::SecretStore,
            "add_version",
            Phase::PersistSecret,
            || async move {
                // A failed attempt may still have stored the version
                if attempted.swap(true, Ordering::Relaxed) {
                    if let Some(version_id) = self.find_persisted(secret_name, run_id).await? {
                        info!(version_id, "Adopting the version stored by an earlier attempt");
                        return Ok(version_id);
                    }
                }
                self.secrets.add_version(secret_name, body).await
            },
        )
        .await
    }

    /// Newest enabled version, if its payload was written by `run_id`
    async fn find_persisted(
        &self,
        secret_name: &str,
        run_id: &str,
    ) -> Result<Option<u64>, ExternalError> {
        let newest = self
            .secrets
            .list_versions(secret_name)
            .await?
            .iter()
            .filter(|v| v.is_enabled())
            .map(|v| v.version_id)
            .max();
        let Some(version_id) = newest else {
            return Ok(None);
        };
        let raw = self.secrets.access_version(secret_name, version_id).await?;
        Ok((payload_run_id(&raw).as_deref() == Some(run_id)).then_some(version_id))
    }

    /// Disable versions beyond retention
    ///
    /// Returns the ids of the versions still enabled afterwards, newest written
    /// first, or `None` when the listing failed and key liveness cannot be
    /// derived.
    async fn prune(
        &self,
        run: &mut RotationRun,
        request: &RotationRequest,
        newest: u64,
        cancel: &CancellationToken,
    ) -> Option<Vec<u64>> {
        let secret_name = request.secret_name.as_str();
        let versions: Vec<SecretRecord> = match retry_with_backoff(
            &self.retry,
            cancel,
            Service::SecretStore,
            "list_versions",
            || self.secrets.list_versions(secret_name),
        )
        .await
        {
            Ok(versions) => versions,
            Err(e) => {
                self.record_cleanup_error(run, CleanupKind::Inspect, "secret versions", e);
                if cancel.is_cancelled() {
                    abandon(run, Phase::PruneVersions);
                }
                return None;
            }
        };

        let plan = plan_prune(&versions, Some(newest), request.retention_count);
        debug!(retained = ?plan.retained, to_disable = ?plan.to_disable, "Prune plan");

        let results = join_all(plan.to_disable.iter().map(|&version_id| async move {
            let result = retry_with_backoff(
                &self.retry,
                cancel,
                Service::SecretStore,
                "disable_version",
                || self.secrets.disable_version(secret_name, version_id),
            )
            .await;
            (version_id, result)
        }))
        .await;

        // A version that could not be disabled is still readable, so its key stays live
        let mut live = plan.retained;
        for (version_id, result) in results {
            match result {
                Ok(()) => {
                    info!(version = version_id, "Disabled old secret version");
                    run.disabled_versions.push(version_id);
                }
                Err(e) => {
                    live.push(version_id);
                    self.record_cleanup_error(
                        run,
                        CleanupKind::DisableVersion,
                        version_id.to_string(),
                        e,
                    );
                }
            }
        }

        if cancel.is_cancelled() {
            abandon(run, Phase::PruneVersions);
            return None;
        }
        Some(live)
    }

    async fn deactivate(
        &self,
        run: &mut RotationRun,
        request: &RotationRequest,
        retained: &[u64],
        credential: &Credential,
        cancel: &CancellationToken,
    ) {
        let mut referenced = match self
            .collect_references(&request.secret_name, retained, Some(&credential.access_id), cancel)
            .await
        {
            References::Known(ids) => ids,
            References::Unknown(failures) => {
                if cancel.is_cancelled() {
                    abandon(run, Phase::DeactivateOldKeys);
                    return;
                }
                warn!(
                    unreadable = failures.len(),
                    "Skipping key deactivation, a retained version could not be read"
                );
                run.warnings.extend(failures);
                return;
            }
        };
        referenced.insert(credential.access_id.clone());

        let owner = request.owner_identity.as_str();
        let keys = match retry_with_backoff(
            &self.retry,
            cancel,
            Service::CredentialStore,
            "list_keys",
            || self.credentials.list_credentials(owner),
        )
        .await
        {
            Ok(keys) => keys,
            Err(e) => {
                self.record_cleanup_error(run, CleanupKind::Inspect, "hmac keys", e);
                if cancel.is_cancelled() {
                    abandon(run, Phase::DeactivateOldKeys);
                }
                return;
            }
        };

        let plan = plan_deactivation(&keys, &referenced, credential.created_at);
        for access_id in &plan.not_yet_adopted {
            info!(access_id = %access_id, "Leaving newer key active, not yet adopted");
        }

        let results = join_all(plan.to_deactivate.iter().map(|access_id| async move {
            let result = retry_with_backoff(
                &self.retry,
                cancel,
                Service::CredentialStore,
                "deactivate_key",
                || self.credentials.deactivate(access_id),
            )
            .await;
            (access_id, result)
        }))
        .await;

        let mut interrupted = false;
        for (access_id, result) in results {
            match result {
                Ok(()) => {
                    info!(access_id = %access_id, "Deactivated old HMAC key");
                    run.deactivated_keys.push(access_id.clone());
                }
                Err(CallError::Cancelled) => interrupted = true,
                Err(e) => self.record_cleanup_error(
                    run,
                    CleanupKind::DeactivateKey,
                    access_id.clone(),
                    e,
                ),
            }
        }

        if interrupted {
            abandon(run, Phase::DeactivateOldKeys);
        }
    }

    /// Read the access ids referenced by `versions`
    ///
    /// `known` is the access id of a version whose payload this run wrote; it is
    /// matched against the first entry and not read back.
    async fn collect_references(
        &self,
        secret_name: &str,
        versions: &[u64],
        known: Option<&str>,
        cancel: &CancellationToken,
    ) -> References {
        let mut ids = BTreeSet::new();
        let to_read: Vec<u64> = match known {
            Some(access_id) => {
                ids.insert(access_id.to_string());
                versions.iter().skip(1).copied().collect()
            }
            None => versions.to_vec(),
        };

        let results = join_all(to_read.iter().map(|&version_id| async move {
            let result = retry_with_backoff(
                &self.retry,
                cancel,
                Service::SecretStore,
                "access_version",
                || self.secrets.access_version(secret_name, version_id),
            )
            .await;
            (version_id, result)
        }))
        .await;

        let mut failures = Vec::new();
        for (version_id, result) in results {
            match result {
                Ok(payload) => match referenced_access_id(&payload) {
                    Some(access_id) => {
                        debug!(version = version_id, access_id = %access_id, "Retained version");
                        ids.insert(access_id);
                    }
                    None => failures.push(CleanupFailure::new(
                        CleanupKind::Inspect,
                        format!("version {version_id}"),
                        "payload does not contain an access id",
                    )),
                },
                Err(CallError::Cancelled) => failures.push(CleanupFailure::new(
                    CleanupKind::Abandoned,
                    format!("version {version_id}"),
                    "run cancelled",
                )),
                Err(e) => failures.push(CleanupFailure::new(
                    CleanupKind::Inspect,
                    format!("version {version_id}"),
                    e.to_string(),
                )),
            }
        }

        if failures.is_empty() {
            References::Known(ids)
        } else {
            References::Unknown(failures)
        }
    }

    /// Compute what a rotation would do without mutating anything
    ///
    /// # Errors
    /// Configuration, verification and listing failures.
    pub async fn plan(
        &self,
        request: &RotationRequest,
        cancel: CancellationToken,
    ) -> Result<RotationPlan, RotationError> {
        let cancel = &cancel;
        request.validate()?;
        self.verify(request, cancel).await?;

        let secret_name = request.secret_name.as_str();
        let versions = self
            .call(cancel, Service::SecretStore, "list_versions", Phase::PruneVersions, || {
                self.secrets.list_versions(secret_name)
            })
            .await?;
        let prune = plan_prune(&versions, None, request.retention_count);

        let owner = request.owner_identity.as_str();
        let keys = self
            .call(cancel, Service::CredentialStore, "list_keys", Phase::DeactivateOldKeys, || {
                self.credentials.list_credentials(owner)
            })
            .await?;

        let (deactivation, blocked_by) = match self
            .collect_references(secret_name, &prune.retained, None, cancel)
            .await
        {
            References::Known(referenced) => {
                (Some(plan_deactivation(&keys, &referenced, Utc::now())), Vec::new())
            }
            References::Unknown(failures) => (None, failures),
        };

        Ok(RotationPlan {
            existing_versions: versions,
            keys,
            prune,
            deactivation,
            blocked_by,
        })
    }

    async fn call<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        service: Service,
        operation: &'static str,
        phase: Phase,
        f: F,
    ) -> Result<T, RotationError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ExternalError>>,
    {
        retry_with_backoff(&self.retry, cancel, service, operation, f)
            .await
            .map_err(|e| e.into_rotation_error(phase))
    }

    fn record_cleanup_error(
        &self,
        run: &mut RotationRun,
        kind: CleanupKind,
        target: impl Into<String>,
        error: CallError,
    ) {
        let target = target.into();
        if matches!(error, CallError::Cancelled) {
            debug!(target = %target, "Cleanup item cancelled");
            return;
        }
        warn!(kind = kind.as_str(), target = %target, error = %error, "Cleanup action failed");
        run.warn(CleanupFailure::new(kind, target, error.to_string()));
    }
}

fn abandon(run: &mut RotationRun, phase: Phase) {
    warn!(phase = %phase, "Run cancelled, abandoning remaining cleanup");
    run.warn(CleanupFailure::new(
        CleanupKind::Abandoned,
        phase.as_str(),
        "run cancelled before cleanup finished",
    ));
}

fn observe(phase: Phase, started: Instant) {
    metrics::observe_phase_duration(phase.as_str(), started.elapsed().as_secs_f64());
}
