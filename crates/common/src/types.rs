//! Identifier types shared by the relay service and its test utilities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Catalog-assigned channel identifier.
///
/// Immutable once assigned; the relay never mints new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChannelId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl FromStr for ChannelId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Error returned when an identity string is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("user identity must not be empty")]
pub struct EmptyIdentity;

/// Authenticated user identity (the username handed out by the authenticator).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserIdentity(String);

impl UserIdentity {
    /// Create an identity, rejecting blank names.
    ///
    /// # Errors
    ///
    /// Returns [`EmptyIdentity`] if `name` is empty after trimming.
    pub fn new(name: impl Into<String>) -> Result<Self, EmptyIdentity> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(EmptyIdentity);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
