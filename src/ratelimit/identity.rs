//! Identity keys for usage tracking.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};

use crate::error::{QuotaError, Result};

/// A key that separates one caller's usage from another's.
///
/// Usually a user id; for middleware-level limits, a client address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Create an identity, rejecting empty or blank keys.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(QuotaError::InvalidIdentity(
                "identity must not be empty".to_string(),
            ));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = QuotaError;

    fn try_from(key: String) -> Result<Self> {
        Self::new(key)
    }
}

impl TryFrom<&str> for Identity {
    type Error = QuotaError;

    fn try_from(key: &str) -> Result<Self> {
        Self::new(key)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl Borrow<str> for Identity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_creation() {
        let identity = Identity::new("user-42").unwrap();
        assert_eq!(identity.as_str(), "user-42");
        assert_eq!(identity.to_string(), "user-42");
    }

    #[test]
    fn test_blank_identity_rejected() {
        assert!(matches!(Identity::new(""), Err(QuotaError::InvalidIdentity(_))));
        assert!(matches!(Identity::new("   "), Err(QuotaError::InvalidIdentity(_))));
    }

    #[test]
    fn test_identity_equality() {
        let a = Identity::try_from("u1").unwrap();
        let b = Identity::try_from("u1".to_string()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_deserialize_validates() {
        let ok: Identity = serde_json::from_str("\"u1\"").unwrap();
        assert_eq!(ok.as_str(), "u1");

        let err = serde_json::from_str::<Identity>("\"\"");
        assert!(err.is_err());
    }
}
