//! Lifecycle events and the listener capability.

use serde::{Deserialize, Serialize};

/// Lifecycle signal delivered to listeners stored in a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeEvent {
    /// The value was stored, or its context became current on a thread.
    Enter,
    /// The context was cleared or replaced on its thread.
    Leave,
}

impl std::fmt::Display for ScopeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeEvent::Enter => write!(f, "ENTER"),
            ScopeEvent::Leave => write!(f, "LEAVE"),
        }
    }
}

/// Values stored with [`ScopedContext::put_listener`](crate::ScopedContext::put_listener)
/// are told when the unit of work they belong to enters or leaves a thread.
///
/// Handlers run while the context lock is held. They must return quickly
/// and must not block; a slow handler stalls every thread touching the
/// same context. The lock is re-entrant, so a handler may read or write its
/// own context.
pub trait ScopeListener: Send + Sync {
    /// Handle one lifecycle event.
    fn event(&self, event: ScopeEvent) -> Result<(), ListenerError>;
}

/// Error returned by a listener's event handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ListenerError {
    message: String,
}

impl ListenerError {
    /// Create a new listener error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Wrap any error as a listener error.
    pub fn from_error(err: impl std::error::Error) -> Self {
        Self::new(err.to_string())
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ListenerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ListenerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
