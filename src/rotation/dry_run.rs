//! # Dry Run
//!
//! Preview of what the next rotation would change, built from live listings.

use super::deactivation::DeactivationPlan;
use super::retention::PrunePlan;
use crate::error::CleanupFailure;
use crate::model::{Credential, SecretRecord};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RotationPlan {
    pub existing_versions: Vec<SecretRecord>,
    pub keys: Vec<Credential>,
    /// Which existing versions stay enabled next to the version a run would add
    pub prune: PrunePlan,
    /// `None` when a retained version could not be read
    pub deactivation: Option<DeactivationPlan>,
    /// Why deactivation could not be planned
    pub blocked_by: Vec<CleanupFailure>,
}

impl RotationPlan {
    /// Log the plan at INFO
    pub fn log(&self) {
        info!(
            versions = self.existing_versions.len(),
            enabled = self.existing_versions.iter().filter(|v| v.is_enabled()).count(),
            keys = self.keys.len(),
            active_keys = self.keys.iter().filter(|k| k.is_active()).count(),
            "Current state"
        );
        info!(
            keep = ?self.prune.retained,
            disable = ?self.prune.to_disable,
            "Would add a new version and prune"
        );
        match &self.deactivation {
            Some(plan) => info!(
                deactivate = ?plan.to_deactivate,
                not_yet_adopted = ?plan.not_yet_adopted,
                "Would deactivate keys"
            ),
            None => {
                for failure in &self.blocked_by {
                    warn!(reason = %failure, "Deactivation would be skipped");
                }
            }
        }
    }

    /// Multi-line report for the terminal
    #[must_use]
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!(
                "secret versions: {} ({} enabled)",
                self.existing_versions.len(),
                self.existing_versions.iter().filter(|v| v.is_enabled()).count()
            ),
            format!(
                "hmac keys: {} ({} active)",
                self.keys.len(),
                self.keys.iter().filter(|k| k.is_active()).count()
            ),
            format!("would keep versions: new + {:?}", self.prune.retained),
            format!("would disable versions: {:?}", self.prune.to_disable),
        ];
        match &self.deactivation {
            Some(plan) => {
                lines.push(format!("would deactivate keys: {:?}", plan.to_deactivate));
                if !plan.not_yet_adopted.is_empty() {
                    lines.push(format!("would leave newer keys: {:?}", plan.not_yet_adopted));
                }
            }
            None => {
                lines.push("would skip key deactivation:".to_string());
                lines.extend(self.blocked_by.iter().map(|f| format!("  {f}")));
            }
        }
        lines.join("\n")
    }
}
