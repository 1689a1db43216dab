//! # Rotation Run
//!
//! In-memory record of one execution and the outcome handed back to the
//! caller. Nothing here is persisted; a crashed run is recovered from the
//! external state by the next one.

use super::Phase;
use crate::error::{CleanupFailure, RotationError};
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use uuid::Uuid;

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    SuccessWithWarnings,
    Failure,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::SuccessWithWarnings => "success_with_warnings",
            RunStatus::Failure => "failure",
        }
    }
}

/// Key minted by the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintedKey {
    pub access_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RotationRun {
    pub run_id: Uuid,
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub new_credential: Option<MintedKey>,
    pub new_version: Option<u64>,
    pub error: Option<RotationError>,
    pub warnings: Vec<CleanupFailure>,
    pub disabled_versions: Vec<u64>,
    pub deactivated_keys: Vec<String>,
}

impl Default for RotationRun {
    fn default() -> Self {
        Self::new()
    }
}

impl RotationRun {
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            phase: Phase::Start,
            started_at: Utc::now(),
            new_credential: None,
            new_version: None,
            error: None,
            warnings: Vec::new(),
            disabled_versions: Vec::new(),
            deactivated_keys: Vec::new(),
        }
    }

    pub fn enter(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub fn warn(&mut self, failure: CleanupFailure) {
        self.warnings.push(failure);
    }

    /// Close the run and build the outcome
    #[must_use]
    pub fn finish(self) -> RotationOutcome {
        let (status, phase_reached) = match (&self.error, self.warnings.is_empty()) {
            (Some(_), _) => (RunStatus::Failure, self.phase),
            (None, true) => (RunStatus::Success, Phase::Done),
            (None, false) => (RunStatus::SuccessWithWarnings, Phase::DoneWithWarnings),
        };
        RotationOutcome {
            run_id: self.run_id,
            status,
            phase_reached,
            new_access_id: self.new_credential.map(|k| k.access_id),
            new_version: self.new_version,
            error: self.error,
            warnings: self.warnings,
            disabled_versions: self.disabled_versions,
            deactivated_keys: self.deactivated_keys,
        }
    }
}

/// Result of [`RotationEngine::rotate`](super::RotationEngine::rotate)
#[derive(Debug, Clone)]
pub struct RotationOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Terminal phase on success, the failing phase on failure
    pub phase_reached: Phase,
    pub new_access_id: Option<String>,
    pub new_version: Option<u64>,
    pub error: Option<RotationError>,
    /// Cleanup actions that did not complete
    pub warnings: Vec<CleanupFailure>,
    pub disabled_versions: Vec<u64>,
    pub deactivated_keys: Vec<String>,
}

impl RotationOutcome {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == RunStatus::Failure
    }

    /// Human-readable one-paragraph report. Never contains secret material.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::new();
        match self.status {
            RunStatus::Failure => {
                let _ = write!(out, "FAILURE in {}", self.phase_reached);
                if let Some(error) = &self.error {
                    let _ = write!(out, ": {error}");
                }
                if let (Some(access_id), None) = (&self.new_access_id, self.new_version) {
                    let _ = write!(
                        out,
                        ". Key {access_id} was minted but not stored; it stays ACTIVE until the next successful run"
                    );
                }
            }
            RunStatus::Success | RunStatus::SuccessWithWarnings => {
                let label = if self.status == RunStatus::Success {
                    "SUCCESS"
                } else {
                    "SUCCESS_WITH_WARNINGS"
                };
                let _ = write!(
                    out,
                    "{label}: stored key {} as version {}",
                    self.new_access_id.as_deref().unwrap_or("?"),
                    self.new_version.map_or_else(|| "?".to_string(), |v| v.to_string()),
                );
                let _ = write!(
                    out,
                    "; disabled {} version(s), deactivated {} key(s)",
                    self.disabled_versions.len(),
                    self.deactivated_keys.len()
                );
                if !self.warnings.is_empty() {
                    let items: Vec<String> = self.warnings.iter().map(ToString::to_string).collect();
                    let _ = write!(
                        out,
                        "; {} cleanup action(s) incomplete: {}",
                        self.warnings.len(),
                        items.join("; ")
                    );
                }
            }
        }
        let _ = write!(out, " (run {})", self.run_id);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CleanupKind;

    #[test]
    fn test_finish_success() {
        let mut run = RotationRun::new();
        run.enter(Phase::DeactivateOldKeys);
        run.new_credential = Some(MintedKey {
            access_id: "GOOG1NEW".to_string(),
            created_at: Utc::now(),
        });
        run.new_version = Some(4);
        run.disabled_versions = vec![2];

        let outcome = run.finish();
        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.phase_reached, Phase::Done);
        assert!(outcome.summary().starts_with("SUCCESS: stored key GOOG1NEW as version 4"));
    }

    #[test]
    fn test_finish_with_warnings_lists_items() {
        let mut run = RotationRun::new();
        run.new_version = Some(2);
        run.warn(CleanupFailure::new(CleanupKind::DeactivateKey, "GOOG1OLD", "HTTP 500"));

        let outcome = run.finish();
        assert_eq!(outcome.status, RunStatus::SuccessWithWarnings);
        assert_eq!(outcome.phase_reached, Phase::DoneWithWarnings);
        assert!(outcome.summary().contains("deactivate_key GOOG1OLD: HTTP 500"));
    }

    #[test]
    fn test_finish_failure_keeps_phase() {
        let mut run = RotationRun::new();
        run.enter(Phase::PersistSecret);
        run.new_credential = Some(MintedKey {
            access_id: "GOOG1ORPHAN".to_string(),
            created_at: Utc::now(),
        });
        run.error = Some(RotationError::Cancelled {
            phase: Phase::PersistSecret,
        });

        let outcome = run.finish();
        assert!(outcome.is_failure());
        assert_eq!(outcome.phase_reached, Phase::PersistSecret);
        let summary = outcome.summary();
        assert!(summary.starts_with("FAILURE in PERSIST_SECRET"));
        assert!(summary.contains("GOOG1ORPHAN was minted but not stored"));
    }
}
