//! # Sensitive Values
//!
//! Wrapper for the HMAC secret. The inner string is wiped on drop and never
//! shows up in `Debug` output.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw secret. Callers must not log the result.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretValue::new("bGFyZ2Ugc2VjcmV0");
        assert_eq!(format!("{secret:?}"), "***");
        assert_eq!(secret.expose(), "bGFyZ2Ugc2VjcmV0");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let secret = SecretValue::new("abc");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"abc\"");
        let back: SecretValue = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, secret);
    }
}
