//! Typed keys addressing slots in a context.

use std::any::TypeId;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{Result, ScopeError};

/// Identifies one slot of a [`ScopedContext`](crate::ScopedContext).
///
/// The stored type is part of the key's identity: `Key::<A>::named("x")`
/// and `Key::<B>::named("x")` address different slots.
pub struct Key<T> {
    raw: RawKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Key<T> {
    /// Key identified by the stored type alone.
    pub fn of() -> Self {
        Self {
            raw: RawKey::new::<T>(None),
            _marker: PhantomData,
        }
    }

    /// Key identified by the stored type and a name.
    ///
    /// A blank name is accepted here but rejected by every context
    /// operation with [`ScopeError::InvalidKey`].
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            raw: RawKey::new::<T>(Some(Arc::from(name.into()))),
            _marker: PhantomData,
        }
    }
}

impl<T> Key<T> {
    /// The key's name, if it has one.
    pub fn name(&self) -> Option<&str> {
        self.raw.name.as_deref()
    }

    pub(crate) fn validate(&self) -> Result<&RawKey> {
        match &self.raw.name {
            Some(name) if name.trim().is_empty() => Err(ScopeError::InvalidKey {
                key: self.raw.to_string(),
            }),
            _ => Ok(&self.raw),
        }
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Key<T> {}

impl<T> Hash for Key<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> std::fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Key").field(&self.raw.to_string()).finish()
    }
}

impl<T> std::fmt::Display for Key<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.raw.fmt(f)
    }
}

/// Type-erased key used inside the context map.
#[derive(Clone)]
pub(crate) struct RawKey {
    type_id: TypeId,
    type_name: &'static str,
    name: Option<Arc<str>>,
}

impl RawKey {
    fn new<T: 'static>(name: Option<Arc<str>>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            name,
        }
    }
}

// type_name is diagnostic only and stays out of equality.
impl PartialEq for RawKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.name == other.name
    }
}

impl Eq for RawKey {}

impl Hash for RawKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.name.hash(state);
    }
}

impl std::fmt::Display for RawKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}@{:?}", self.type_name, name),
            None => write!(f, "{}", self.type_name),
        }
    }
}
