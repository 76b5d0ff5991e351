//! Wallet identities.
//!
//! The wallet address string is the sole ownership key. It is not verified
//! cryptographically; it is normalized once, at the request boundary, so that
//! every read and write against the metadata store and the quota ledger uses
//! the same spelling regardless of how the caller cased it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum accepted identity length.
pub const MAX_IDENTITY_LEN: usize = 128;

/// A normalized wallet identity (trimmed, lowercase).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Parse and normalize a raw wallet address.
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(crate::Error::InvalidIdentity(
                "wallet address is empty".to_string(),
            ));
        }
        if trimmed.len() > MAX_IDENTITY_LEN {
            return Err(crate::Error::InvalidIdentity(format!(
                "wallet address exceeds {MAX_IDENTITY_LEN} characters"
            )));
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(crate::Error::InvalidIdentity(
                "wallet address contains whitespace or control characters".to_string(),
            ));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    /// Get the normalized string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.0
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
