//! # Deactivation
//!
//! Ties key liveness to secret retention: a key stays ACTIVE exactly as long
//! as a retained version references it.
//!
//! Keys created after the newest referenced key are left alone. They belong
//! to a rotation that has not persisted yet and may be adopted shortly.

use crate::model::Credential;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeactivationPlan {
    /// ACTIVE keys no retained version references
    pub to_deactivate: Vec<String>,
    /// Unreferenced ACTIVE keys newer than every referenced key
    pub not_yet_adopted: Vec<String>,
    /// Creation time of the newest referenced key
    pub cutoff: DateTime<Utc>,
}

/// Build the deactivation plan
///
/// `keys` is the owner's key listing, `referenced` the access ids found in the
/// retained versions, `newest_known` the creation time of the newest key known
/// to be referenced even if the listing lags behind.
#[must_use]
pub fn plan_deactivation(
    keys: &[Credential],
    referenced: &BTreeSet<String>,
    newest_known: DateTime<Utc>,
) -> DeactivationPlan {
    let cutoff = keys
        .iter()
        .filter(|k| referenced.contains(&k.access_id))
        .map(|k| k.created_at)
        .fold(newest_known, DateTime::max);

    let mut plan = DeactivationPlan {
        cutoff,
        ..DeactivationPlan::default()
    };
    for key in keys.iter().filter(|k| k.is_active()) {
        if referenced.contains(&key.access_id) {
            continue;
        }
        if key.created_at > cutoff {
            plan.not_yet_adopted.push(key.access_id.clone());
        } else {
            plan.to_deactivate.push(key.access_id.clone());
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CredentialStatus;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap()
    }

    fn key(id: &str, minute: u32, status: CredentialStatus) -> Credential {
        Credential {
            access_id: id.to_string(),
            secret: None,
            owner: "sa@p.iam.gserviceaccount.com".to_string(),
            status,
            created_at: at(minute),
        }
    }

    fn ids(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_unreferenced_keys_are_deactivated() {
        let keys = vec![
            key("D", 40, CredentialStatus::Active),
            key("A", 30, CredentialStatus::Active),
            key("B", 20, CredentialStatus::Active),
            key("C", 10, CredentialStatus::Inactive),
        ];
        let plan = plan_deactivation(&keys, &ids(&["D", "A"]), at(40));
        assert_eq!(plan.to_deactivate, vec!["B".to_string()]);
        assert!(plan.not_yet_adopted.is_empty());
    }

    #[test]
    fn test_newer_keys_are_not_yet_adopted() {
        let keys = vec![
            key("E", 50, CredentialStatus::Active),
            key("D", 40, CredentialStatus::Active),
            key("B", 20, CredentialStatus::Active),
        ];
        let plan = plan_deactivation(&keys, &ids(&["D"]), at(40));
        assert_eq!(plan.to_deactivate, vec!["B".to_string()]);
        assert_eq!(plan.not_yet_adopted, vec!["E".to_string()]);
        assert_eq!(plan.cutoff, at(40));
    }

    #[test]
    fn test_orphan_from_failed_run_is_cleaned_up() {
        // X was minted by a run that never persisted; D is the key just stored.
        let keys = vec![
            key("D", 45, CredentialStatus::Active),
            key("X", 35, CredentialStatus::Active),
            key("A", 30, CredentialStatus::Active),
        ];
        let plan = plan_deactivation(&keys, &ids(&["D", "A"]), at(45));
        assert_eq!(plan.to_deactivate, vec!["X".to_string()]);
    }

    #[test]
    fn test_listing_lag_uses_newest_known() {
        let keys = vec![key("A", 30, CredentialStatus::Active), key("B", 20, CredentialStatus::Active)];
        let plan = plan_deactivation(&keys, &ids(&["D", "A"]), at(40));
        assert_eq!(plan.cutoff, at(40));
        assert_eq!(plan.to_deactivate, vec!["B".to_string()]);
    }
}
