//! # Retention
//!
//! Decides which secret versions stay enabled after a rotation.
//!
//! `retention_count` is inclusive of the version just written: that version
//! plus the `retention_count - 1` next most recent ENABLED versions are kept,
//! every other ENABLED version is disabled. DISABLED and DESTROYED versions
//! are never touched, so applying the plan twice disables nothing new.

use crate::model::SecretRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrunePlan {
    /// Versions that stay enabled, newest first
    pub retained: Vec<u64>,
    /// Enabled versions to disable, newest first
    pub to_disable: Vec<u64>,
}

/// Build the prune plan for a version listing
///
/// `newest` is the version the current run wrote. It is retained even if the
/// listing does not show it yet. With `None` the plan describes what a run
/// would do after adding one more version.
#[must_use]
pub fn plan_prune(versions: &[SecretRecord], newest: Option<u64>, retention_count: usize) -> PrunePlan {
    let mut enabled: Vec<u64> = versions
        .iter()
        .filter(|v| v.is_enabled())
        .map(|v| v.version_id)
        .filter(|id| Some(*id) != newest)
        .collect();
    enabled.sort_unstable_by(|a, b| b.cmp(a));
    enabled.dedup();

    let keep_others = retention_count.saturating_sub(1);
    let split = keep_others.min(enabled.len());
    let to_disable = enabled.split_off(split);

    let mut retained = Vec::with_capacity(split + 1);
    retained.extend(newest);
    retained.extend(enabled);

    PrunePlan {
        retained,
        to_disable,
    }
}
