//! # Secret Versions
//!
//! Metadata of one Secret Manager version. Payloads are fetched separately.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
    Enabled,
    Disabled,
    Destroyed,
}

impl VersionState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionState::Enabled => "ENABLED",
            VersionState::Disabled => "DISABLED",
            VersionState::Destroyed => "DESTROYED",
        }
    }

    /// Unknown states are treated as destroyed so they are never pruned or read
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "ENABLED" => VersionState::Enabled,
            "DISABLED" => VersionState::Disabled,
            _ => VersionState::Destroyed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRecord {
    /// Monotonic version number assigned by the store
    pub version_id: u64,
    pub state: VersionState,
    pub created_at: Option<DateTime<Utc>>,
}

impl SecretRecord {
    #[must_use]
    pub fn new(version_id: u64, state: VersionState) -> Self {
        Self {
            version_id,
            state,
            created_at: None,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state == VersionState::Enabled
    }
}

/// Order versions newest first
pub fn sort_newest_first(records: &mut [SecretRecord]) {
    records.sort_by(|a, b| b.version_id.cmp(&a.version_id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_newest_first() {
        let mut records = vec![
            SecretRecord::new(1, VersionState::Disabled),
            SecretRecord::new(10, VersionState::Enabled),
            SecretRecord::new(2, VersionState::Enabled),
        ];
        sort_newest_first(&mut records);
        let ids: Vec<u64> = records.iter().map(|r| r.version_id).collect();
        assert_eq!(ids, vec![10, 2, 1]);
    }

    #[test]
    fn test_unknown_state_is_not_enabled() {
        assert_eq!(VersionState::parse("STATE_UNSPECIFIED"), VersionState::Destroyed);
        assert!(!SecretRecord::new(1, VersionState::parse("?")).is_enabled());
    }
}
