//! Error types for scope operations.

use crate::event::{ListenerError, ScopeEvent};
use crate::id::ContextId;

/// Result type for scope operations.
pub type Result<T> = std::result::Result<T, ScopeError>;

/// Errors that can occur during scope operations.
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    /// Key with a blank name
    #[error("Invalid key: {key} (name must not be blank)")]
    InvalidKey {
        /// Rendered key
        key: String,
    },

    /// One or more listeners failed while an event was broadcast.
    ///
    /// Every other listener still received the event, and the operation
    /// that triggered the broadcast was completed.
    #[error("{} listener(s) failed: {}", .0.len(), summarize(.0))]
    Listeners(Vec<ListenerFailure>),
}

impl ScopeError {
    /// Listener failures carried by this error, empty for other variants.
    pub fn listener_failures(&self) -> &[ListenerFailure] {
        match self {
            ScopeError::Listeners(failures) => failures,
            _ => &[],
        }
    }
}

/// A single listener failure recorded during a broadcast.
#[derive(Debug, Clone)]
pub struct ListenerFailure {
    /// Event being delivered
    pub event: ScopeEvent,

    /// Context the listener is stored in
    pub context: ContextId,

    /// Type name of the listener
    pub listener: &'static str,

    /// What the listener returned
    pub error: ListenerError,
}

impl std::fmt::Display for ListenerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} on {} in context {}: {}",
            self.event, self.listener, self.context, self.error
        )
    }
}

fn summarize(failures: &[ListenerFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Collects listener failures across several broadcasts.
#[derive(Debug, Default)]
pub(crate) struct FailureSink {
    failures: Vec<ListenerFailure>,
}

impl FailureSink {
    pub(crate) fn absorb(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(ScopeError::Listeners(failures)) => {
                self.failures.extend(failures);
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    pub(crate) fn push(&mut self, failure: ListenerFailure) {
        self.failures.push(failure);
    }

    pub(crate) fn finish(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(ScopeError::Listeners(self.failures))
        }
    }
}
