//! Thread-affinitized lifecycle scope.
//!
//! A [`ScopedContext`] holds the values of one unit of work (a request, a
//! job). A [`ScopeManager`] records which context is current on each
//! thread and moves contexts between threads with
//! [`ScopeManager::change_scope`], telling stored [`ScopeListener`]s when
//! their unit of work becomes active (`ENTER`) or inactive (`LEAVE`).
//!
//! ```
//! use std::sync::Arc;
//! use threadscope_core::{Key, ScopeManager, ScopedContext};
//!
//! let manager = ScopeManager::new();
//! let request = Arc::new(ScopedContext::new());
//! request.put(&Key::<String>::named("user"), Some(Arc::new("ada".to_string())))?;
//!
//! manager.change_scope(Some(request.clone()))?;
//! let user = manager.get_context().get(&Key::<String>::named("user"))?;
//! assert_eq!(user.as_deref().map(String::as_str), Some("ada"));
//!
//! manager.change_scope(None)?;
//! assert!(!Arc::ptr_eq(&request, &manager.get_context()));
//! # Ok::<(), threadscope_core::ScopeError>(())
//! ```

#![warn(missing_docs)]

mod id;
mod key;
mod event;
mod error;

// Store and hand-off
mod context;
mod manager;

#[cfg(test)]
mod testing;

// Re-exports
pub use id::ContextId;
pub use key::Key;
pub use event::{ListenerError, ScopeEvent, ScopeListener};
pub use error::{ListenerFailure, Result, ScopeError};
pub use context::ScopedContext;
pub use manager::ScopeManager;
