//! Unique identifiers for scoped contexts.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a ScopedContext.
///
/// Only used to tell contexts apart in logs and reports. Identity of a
/// context is still the `Arc` it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(Ulid);

impl ContextId {
    /// Generate a new ContextId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for ContextId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}
