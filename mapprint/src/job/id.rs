//! Job reference identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest accepted reference id.
pub const MAX_REFERENCE_ID_LEN: usize = 128;

/// Rejected reference id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid reference id '{value}': {reason}")]
pub struct InvalidReferenceId {
    pub value: String,
    pub reason: &'static str,
}

/// Globally unique job identifier.
///
/// Ids are embedded in registry keys, so they may not contain `:` or
/// whitespace.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReferenceId(String);

impl ReferenceId {
    /// Validates a caller-supplied id.
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidReferenceId> {
        let value = value.into();
        let reason = if value.is_empty() {
            Some("must not be empty")
        } else if value.len() > MAX_REFERENCE_ID_LEN {
            Some("longer than 128 bytes")
        } else if value.contains(':') {
            Some("must not contain ':'")
        } else if value.chars().any(char::is_whitespace) {
            Some("must not contain whitespace")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(InvalidReferenceId { value, reason }),
            None => Ok(Self(value)),
        }
    }

    /// Generates a random (UUID v4) id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReferenceId({})", self.0)
    }
}

impl TryFrom<String> for ReferenceId {
    type Error = InvalidReferenceId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ReferenceId> for String {
    fn from(id: ReferenceId) -> Self {
        id.0
    }
}

impl AsRef<str> for ReferenceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
