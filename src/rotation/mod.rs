//! # Rotation
//!
//! The credential rotation engine and the policies it applies.
//!
//! ```text
//! START -> VERIFY -> MINT_CREDENTIAL -> PERSIST_SECRET -> PRUNE_VERSIONS
//!       -> DEACTIVATE_OLD_KEYS -> DONE | DONE_WITH_WARNINGS
//! ```
//!
//! Any phase may end in `FAILED`. Nothing is pruned or deactivated before the
//! new key has been persisted, so at every point at least one stored version
//! references an ACTIVE key.

pub mod deactivation;
pub mod dry_run;
pub mod engine;
pub mod retention;
pub mod retry;
pub mod run;

pub use deactivation::{plan_deactivation, DeactivationPlan};
pub use dry_run::RotationPlan;
pub use engine::RotationEngine;
pub use retention::{plan_prune, PrunePlan};
pub use retry::{retry_with_backoff, CallError, RetryPolicy};
pub use run::{RotationOutcome, RotationRun, RunStatus};

use std::fmt;

/// State machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Start,
    Verify,
    MintCredential,
    PersistSecret,
    PruneVersions,
    DeactivateOldKeys,
    Done,
    DoneWithWarnings,
    Failed,
}

impl Phase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Start => "START",
            Phase::Verify => "VERIFY",
            Phase::MintCredential => "MINT_CREDENTIAL",
            Phase::PersistSecret => "PERSIST_SECRET",
            Phase::PruneVersions => "PRUNE_VERSIONS",
            Phase::DeactivateOldKeys => "DEACTIVATE_OLD_KEYS",
            Phase::Done => "DONE",
            Phase::DoneWithWarnings => "DONE_WITH_WARNINGS",
            Phase::Failed => "FAILED",
        }
    }

    /// True once the new key is durably stored
    #[must_use]
    pub fn is_after_persist(&self) -> bool {
        matches!(
            self,
            Phase::PruneVersions | Phase::DeactivateOldKeys | Phase::Done | Phase::DoneWithWarnings
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::DeactivateOldKeys.to_string(), "DEACTIVATE_OLD_KEYS");
        assert_eq!(Phase::DoneWithWarnings.to_string(), "DONE_WITH_WARNINGS");
    }

    #[test]
    fn test_after_persist() {
        assert!(!Phase::PersistSecret.is_after_persist());
        assert!(Phase::PruneVersions.is_after_persist());
        assert!(!Phase::MintCredential.is_after_persist());
    }
}
