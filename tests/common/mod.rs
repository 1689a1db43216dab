//! Common test utilities
//!
//! - rustls crypto provider setup for the Pact tests
//! - in-memory credential store, secret store and bucket probe with fault
//!   injection for the engine tests

#![allow(dead_code, reason = "Each test binary uses a different subset")]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac_key_rotator::error::{ExternalError, Service};
use hmac_key_rotator::model::{
    Credential, CredentialStatus, RotationPayload, SecretRecord, SecretValue, VersionState,
};
use hmac_key_rotator::provider::{CredentialStore, ResourceInfo, ResourceProbe, SecretStore};
use hmac_key_rotator::rotation::{RetryPolicy, RotationEngine};
use hmac_key_rotator::RotationRequest;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests
///
/// Uses a `Once` to ensure it's only called once across all tests.
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}

pub const OWNER: &str = "hmac-rotator@test-project.iam.gserviceaccount.com";
pub const BUCKET: &str = "test-bucket";
pub const SECRET: &str = "gcs-hmac-key";
pub const PROJECT: &str = "test-project";

pub fn request(retention_count: usize) -> RotationRequest {
    RotationRequest::new(OWNER, BUCKET, SECRET, retention_count)
}

/// Short backoff so retried tests stay fast
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(
        3,
        Duration::from_millis(10),
        Duration::from_millis(40),
        Duration::from_secs(1),
    )
}

pub fn transient(service: Service, operation: &'static str) -> ExternalError {
    ExternalError::transient(service, operation, "HTTP 503: backend unavailable")
}

pub fn permanent(service: Service, operation: &'static str, status: u16) -> ExternalError {
    ExternalError::permanent_status(service, operation, status, format!("HTTP {status}"))
}

/// Payload in the current flat layout
pub fn payload_for(access_id: &str) -> String {
    RotationPayload::new(
        access_id,
        SecretValue::new(format!("secret-of-{access_id}")),
        OWNER,
        Utc::now(),
        Utc::now(),
        "seeded",
        BUCKET,
        PROJECT,
    )
    .to_json()
    .expect("payload serializes")
}

/// Payload in the nested layout written by earlier rotators
pub fn legacy_payload_for(access_id: &str) -> String {
    serde_json::json!({
        "hmac_credentials": {
            "access_id": access_id,
            "secret": format!("secret-of-{access_id}"),
        },
        "service_account_email": OWNER,
        "created_time": "2025-01-01T00:00:00Z",
    })
    .to_string()
}

/// Minutes before now, for seeding keys older than anything a run mints
pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - ChronoDuration::minutes(minutes)
}

/// Fault injection shared by the fakes
///
/// Faults are keyed by `operation` or `operation:target` (`disable_version:3`,
/// `deactivate_key:GOOG1OLD`). Targeted faults win over untargeted ones.
#[derive(Default)]
pub struct Faults {
    queued: Mutex<HashMap<String, VecDeque<ExternalError>>>,
    always: Mutex<HashMap<String, ExternalError>>,
    delays: Mutex<HashMap<String, Duration>>,
    cancel_on: Mutex<HashMap<String, CancellationToken>>,
    lost_replies: Mutex<HashMap<String, VecDeque<ExternalError>>>,
}

impl Faults {
    /// Fail the next `times` calls of `key`
    pub fn fail_times(&self, key: &str, error: ExternalError, times: usize) {
        let mut queued = self.queued.lock().unwrap();
        let entry = queued.entry(key.to_string()).or_default();
        for _ in 0..times {
            entry.push_back(error.clone());
        }
    }

    /// Fail every call of `key`
    pub fn fail_always(&self, key: &str, error: ExternalError) {
        self.always.lock().unwrap().insert(key.to_string(), error);
    }

    /// Sleep before every call of `key` (before any side effect)
    pub fn delay(&self, key: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(key.to_string(), delay);
    }

    /// Let the next `times` calls of `key` take effect, then fail them
    pub fn lose_replies(&self, key: &str, error: ExternalError, times: usize) {
        let mut lost = self.lost_replies.lock().unwrap();
        let entry = lost.entry(key.to_string()).or_default();
        for _ in 0..times {
            entry.push_back(error.clone());
        }
    }

    /// Cancel `token` when `key` is first called
    pub fn cancel_on(&self, key: &str, token: CancellationToken) {
        self.cancel_on.lock().unwrap().insert(key.to_string(), token);
    }

    async fn check(&self, operation: &str, target: Option<&str>) -> Result<(), ExternalError> {
        let keys: Vec<String> = target
            .map(|t| format!("{operation}:{t}"))
            .into_iter()
            .chain(std::iter::once(operation.to_string()))
            .collect();

        let token = {
            let mut cancel_on = self.cancel_on.lock().unwrap();
            keys.iter().find_map(|k| cancel_on.remove(k))
        };
        if let Some(token) = token {
            token.cancel();
        }

        let delay = {
            let delays = self.delays.lock().unwrap();
            keys.iter().find_map(|k| delays.get(k).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        for key in &keys {
            if let Some(error) = self
                .queued
                .lock()
                .unwrap()
                .get_mut(key)
                .and_then(VecDeque::pop_front)
            {
                return Err(error);
            }
            if let Some(error) = self.always.lock().unwrap().get(key) {
                return Err(error.clone());
            }
        }
        Ok(())
    }

    /// Reply of a call whose side effect already happened
    fn reply(&self, operation: &str) -> Result<(), ExternalError> {
        match self
            .lost_replies
            .lock()
            .unwrap()
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Ordered record of successful calls across all fakes
#[derive(Default, Clone)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }

    /// Calls that change external state
    pub fn mutations(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| {
                e.starts_with("create_key")
                    || e.starts_with("add_version")
                    || e.starts_with("disable_version")
                    || e.starts_with("deactivate_key")
            })
            .collect()
    }
}

/// In-memory HMAC key service
pub struct FakeCredentialStore {
    keys: Mutex<Vec<Credential>>,
    minted: Mutex<u32>,
    pub faults: Faults,
    log: CallLog,
}

impl FakeCredentialStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            keys: Mutex::new(Vec::new()),
            minted: Mutex::new(0),
            faults: Faults::default(),
            log,
        }
    }

    pub fn seed(&self, access_id: &str, status: CredentialStatus, created_at: DateTime<Utc>) {
        self.keys.lock().unwrap().push(Credential {
            access_id: access_id.to_string(),
            secret: None,
            owner: OWNER.to_string(),
            status,
            created_at,
        });
    }

    pub fn status(&self, access_id: &str) -> Option<CredentialStatus> {
        self.keys
            .lock()
            .unwrap()
            .iter()
            .find(|k| k.access_id == access_id)
            .map(|k| k.status)
    }

    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .keys
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.is_active())
            .map(|k| k.access_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn minted_ids(&self) -> Vec<String> {
        self.keys
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.access_id.starts_with("GOOG1NEW"))
            .map(|k| k.access_id.clone())
            .collect()
    }
}

#[async_trait]
impl CredentialStore for FakeCredentialStore {
    async fn create_credential(&self, owner: &str) -> Result<Credential, ExternalError> {
        self.faults.check("create_key", None).await?;
        let n = {
            let mut minted = self.minted.lock().unwrap();
            *minted += 1;
            *minted
        };
        let credential = Credential {
            access_id: format!("GOOG1NEW{n:04}"),
            secret: Some(SecretValue::new(format!("minted-secret-{n}"))),
            owner: owner.to_string(),
            status: CredentialStatus::Active,
            created_at: Utc::now() + ChronoDuration::seconds(i64::from(n)),
        };
        self.keys.lock().unwrap().push(credential.metadata());
        self.log.push(format!("create_key:{}", credential.access_id));
        Ok(credential)
    }

    async fn list_credentials(&self, owner: &str) -> Result<Vec<Credential>, ExternalError> {
        self.faults.check("list_keys", None).await?;
        let mut keys: Vec<Credential> = self
            .keys
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.owner == owner)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.log.push("list_keys".to_string());
        Ok(keys)
    }

    async fn deactivate(&self, access_id: &str) -> Result<(), ExternalError> {
        self.faults.check("deactivate_key", Some(access_id)).await?;
        let mut keys = self.keys.lock().unwrap();
        let key = keys
            .iter_mut()
            .find(|k| k.access_id == access_id)
            .ok_or_else(|| permanent(Service::CredentialStore, "deactivate_key", 404))?;
        key.status = CredentialStatus::Inactive;
        self.log.push(format!("deactivate_key:{access_id}"));
        Ok(())
    }
}

struct StoredVersion {
    id: u64,
    state: VersionState,
    payload: String,
}

/// In-memory Secret Manager secret
pub struct FakeSecretStore {
    exists: Mutex<bool>,
    versions: Mutex<Vec<StoredVersion>>,
    pub faults: Faults,
    log: CallLog,
}

impl FakeSecretStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            exists: Mutex::new(false),
            versions: Mutex::new(Vec::new()),
            faults: Faults::default(),
            log,
        }
    }

    /// Append a version; returns its id
    pub fn seed(&self, payload: &str, state: VersionState) -> u64 {
        *self.exists.lock().unwrap() = true;
        let mut versions = self.versions.lock().unwrap();
        let id = versions.len() as u64 + 1;
        versions.push(StoredVersion {
            id,
            state,
            payload: payload.to_string(),
        });
        id
    }

    /// Create the secret without versions
    pub fn create_empty(&self) {
        *self.exists.lock().unwrap() = true;
    }

    pub fn state(&self, version_id: u64) -> Option<VersionState> {
        self.versions
            .lock()
            .unwrap()
            .iter()
            .find(|v| v.id == version_id)
            .map(|v| v.state)
    }

    pub fn enabled_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .versions
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.state == VersionState::Enabled)
            .map(|v| v.id)
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids
    }

    pub fn payload(&self, version_id: u64) -> Option<String> {
        self.versions
            .lock()
            .unwrap()
            .iter()
            .find(|v| v.id == version_id)
            .map(|v| v.payload.clone())
    }

    pub fn version_count(&self) -> usize {
        self.versions.lock().unwrap().len()
    }
}

#[async_trait]
impl SecretStore for FakeSecretStore {
    async fn add_version(&self, secret_name: &str, payload: &str) -> Result<u64, ExternalError> {
        self.faults.check("add_version", None).await?;
        let id = self.seed(payload, VersionState::Enabled);
        self.log.push(format!("add_version:{secret_name}:{id}"));
        self.faults.reply("add_version")?;
        Ok(id)
    }

    async fn list_versions(&self, _secret_name: &str) -> Result<Vec<SecretRecord>, ExternalError> {
        self.faults.check("list_versions", None).await?;
        self.log.push("list_versions".to_string());
        let mut records: Vec<SecretRecord> = self
            .versions
            .lock()
            .unwrap()
            .iter()
            .map(|v| SecretRecord::new(v.id, v.state))
            .collect();
        records.sort_by(|a, b| b.version_id.cmp(&a.version_id));
        Ok(records)
    }

    async fn disable_version(
        &self,
        _secret_name: &str,
        version_id: u64,
    ) -> Result<(), ExternalError> {
        self.faults
            .check("disable_version", Some(&version_id.to_string()))
            .await?;
        let mut versions = self.versions.lock().unwrap();
        let version = versions
            .iter_mut()
            .find(|v| v.id == version_id)
            .ok_or_else(|| permanent(Service::SecretStore, "disable_version", 404))?;
        if version.state == VersionState::Enabled {
            version.state = VersionState::Disabled;
        }
        self.log.push(format!("disable_version:{version_id}"));
        Ok(())
    }

    async fn access_version(
        &self,
        _secret_name: &str,
        version_id: u64,
    ) -> Result<Zeroizing<String>, ExternalError> {
        self.faults
            .check("access_version", Some(&version_id.to_string()))
            .await?;
        self.log.push(format!("access_version:{version_id}"));
        self.payload(version_id)
            .map(Zeroizing::new)
            .ok_or_else(|| permanent(Service::SecretStore, "access_version", 404))
    }

    async fn access_latest(
        &self,
        _secret_name: &str,
    ) -> Result<Option<Zeroizing<String>>, ExternalError> {
        self.faults.check("access_latest", None).await?;
        Ok(self
            .enabled_ids()
            .first()
            .and_then(|id| self.payload(*id))
            .map(Zeroizing::new))
    }

    async fn secret_exists(&self, _secret_name: &str) -> Result<bool, ExternalError> {
        self.faults.check("get_secret", None).await?;
        self.log.push("get_secret".to_string());
        Ok(*self.exists.lock().unwrap())
    }
}

/// In-memory bucket metadata lookup
pub struct FakeBucket {
    pub faults: Faults,
    log: CallLog,
}

#[async_trait]
impl ResourceProbe for FakeBucket {
    async fn probe(&self, resource_name: &str) -> Result<ResourceInfo, ExternalError> {
        self.faults.check("get_bucket", None).await?;
        self.log.push("get_bucket".to_string());
        Ok(ResourceInfo {
            name: resource_name.to_string(),
            location: Some("EU".to_string()),
            storage_class: Some("STANDARD".to_string()),
        })
    }
}

/// The three fakes sharing one call log
pub struct FakeGcp {
    pub keys: Arc<FakeCredentialStore>,
    pub secrets: Arc<FakeSecretStore>,
    pub bucket: Arc<FakeBucket>,
    pub log: CallLog,
}

impl Default for FakeGcp {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGcp {
    pub fn new() -> Self {
        let log = CallLog::default();
        Self {
            keys: Arc::new(FakeCredentialStore::new(log.clone())),
            secrets: Arc::new(FakeSecretStore::new(log.clone())),
            bucket: Arc::new(FakeBucket {
                faults: Faults::default(),
                log: log.clone(),
            }),
            log,
        }
    }

    /// Seed an ACTIVE key referenced by an ENABLED version, as a previous run leaves it
    pub fn seed_rotation(&self, access_id: &str, minutes_ago_created: i64) -> u64 {
        self.keys.seed(
            access_id,
            CredentialStatus::Active,
            minutes_ago(minutes_ago_created),
        );
        self.secrets
            .seed(&payload_for(access_id), VersionState::Enabled)
    }

    pub fn engine(&self) -> RotationEngine {
        self.engine_with(fast_retry())
    }

    pub fn engine_with(&self, retry: RetryPolicy) -> RotationEngine {
        RotationEngine::new(
            Arc::clone(&self.keys) as Arc<dyn CredentialStore>,
            Arc::clone(&self.secrets) as Arc<dyn SecretStore>,
            Arc::clone(&self.bucket) as Arc<dyn ResourceProbe>,
            retry,
            PROJECT,
        )
    }
}
