//! Consumers of the thread-affinitized scope.
//!
//! [`ScopedProvider`] caches one value per unit of work, the way a DI
//! container scopes a binding. [`UnitOfWork`] is the boundary driver that
//! installs a context when work starts on a thread and detaches it when the
//! work ends there.

#![warn(missing_docs)]

pub mod provider;
pub mod unit;

pub use provider::ScopedProvider;
pub use unit::UnitOfWork;
