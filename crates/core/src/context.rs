//! The scoped context store.
//!
//! A [`ScopedContext`] holds the values belonging to one unit of work. It is
//! not tied to a thread: the [`ScopeManager`](crate::ScopeManager) decides
//! which context is current where, and a context can be handed from one
//! thread to another.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use tracing::{trace, warn};

use crate::error::{FailureSink, ListenerFailure, Result};
use crate::event::{ScopeEvent, ScopeListener};
use crate::id::ContextId;
use crate::key::{Key, RawKey};

type AnyValue = Arc<dyn Any + Send + Sync>;

/// A listener view of a stored value.
#[derive(Clone)]
struct Registered {
    listener: Arc<dyn ScopeListener>,
    type_name: &'static str,
}

impl Registered {
    fn addr(&self) -> usize {
        Arc::as_ptr(&self.listener) as *const () as usize
    }
}

struct Slot {
    value: Option<AnyValue>,
    listener: Option<Registered>,
    seq: u64,
}

#[derive(Default)]
struct Contents {
    slots: HashMap<RawKey, Slot>,
    next_seq: u64,
}

impl Contents {
    fn insert(&mut self, key: RawKey, value: Option<AnyValue>, listener: Option<Registered>) -> Option<Slot> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(key, Slot { value, listener, seq })
    }

    /// Current listeners, in slot insertion order, one entry per instance.
    fn listeners(&self) -> Vec<Registered> {
        let mut found: Vec<(u64, &Registered)> = self
            .slots
            .values()
            .filter_map(|slot| slot.listener.as_ref().map(|l| (slot.seq, l)))
            .collect();
        found.sort_by_key(|(seq, _)| *seq);

        let mut seen = HashSet::new();
        found
            .into_iter()
            .filter(|(_, l)| seen.insert(l.addr()))
            .map(|(_, l)| l.clone())
            .collect()
    }
}

/// Keyed store for the values of one unit of work.
///
/// Every public operation runs under one lock owned by the instance, so
/// operations on the same context are linearizable. The lock is re-entrant:
/// listener handlers run while it is held and may call back into the same
/// context from the same thread.
pub struct ScopedContext {
    id: ContextId,
    inner: ReentrantMutex<RefCell<Contents>>,
}

impl ScopedContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self {
            id: ContextId::new(),
            inner: ReentrantMutex::new(RefCell::new(Contents::default())),
        }
    }

    /// Diagnostic identifier of this context.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Whether a slot exists for `key`, including slots holding no value.
    pub fn contains_key<T>(&self, key: &Key<T>) -> Result<bool> {
        let raw = key.validate()?;
        let guard = self.inner.lock();
        let contents = guard.borrow();
        Ok(contents.slots.contains_key(raw))
    }

    /// Get the value stored under `key`.
    ///
    /// A missing key and a slot holding no value both return `Ok(None)`.
    pub fn get<T: Send + Sync + 'static>(&self, key: &Key<T>) -> Result<Option<Arc<T>>> {
        let raw = key.validate()?;
        let guard = self.inner.lock();
        let value = guard
            .borrow()
            .slots
            .get(raw)
            .and_then(|slot| slot.value.clone());
        Ok(value.and_then(|v| v.downcast::<T>().ok()))
    }

    /// Store a plain value under `key`, replacing whatever was there.
    ///
    /// `None` stores an explicit "no value". Values stored this way never
    /// receive lifecycle events, even when their type implements
    /// [`ScopeListener`]; use [`put_listener`](Self::put_listener) for that.
    pub fn put<T: Send + Sync + 'static>(&self, key: &Key<T>, value: Option<Arc<T>>) -> Result<()> {
        let raw = key.validate()?;
        let guard = self.inner.lock();
        let previous = guard
            .borrow_mut()
            .insert(raw.clone(), value.map(|v| v as AnyValue), None);
        // Dropped outside the borrow: a value's Drop may touch this context.
        drop(previous);
        drop(guard);
        Ok(())
    }

    /// Store a listener under `key`, replacing whatever was there, and
    /// deliver it one `Enter` before returning.
    ///
    /// The `Enter` is sent whether or not this context is current on any
    /// thread. If the handler fails the value stays stored and the failure
    /// is returned.
    pub fn put_listener<T: ScopeListener + 'static>(&self, key: &Key<T>, value: Arc<T>) -> Result<()> {
        let raw = key.validate()?;
        let registered = Registered {
            listener: value.clone(),
            type_name: std::any::type_name::<T>(),
        };

        let guard = self.inner.lock();
        let previous = guard
            .borrow_mut()
            .insert(raw.clone(), Some(value as AnyValue), Some(registered.clone()));
        drop(previous);

        let mut sink = FailureSink::default();
        self.deliver(&registered, ScopeEvent::Enter, &mut sink);
        drop(guard);
        sink.finish()
    }

    /// Broadcast `LEAVE` to every listener, then drop all stored values.
    pub fn clear(&self) -> Result<()> {
        let guard = self.inner.lock();
        let mut sink = FailureSink::default();
        self.broadcast(&guard, ScopeEvent::Leave, &mut sink);

        let drained = std::mem::take(&mut *guard.borrow_mut());
        drop(drained);
        drop(guard);
        sink.finish()
    }

    /// Run `f` with this context's lock held.
    ///
    /// The lock is re-entrant, so `f` may call any operation on the context.
    /// Other threads touching the context wait until `f` returns, which
    /// makes a lookup followed by an insert atomic.
    pub fn locked<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let _guard = self.inner.lock();
        f(self)
    }

    /// Number of stored slots.
    pub fn size(&self) -> usize {
        self.inner.lock().borrow().slots.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of distinct listeners currently stored.
    pub fn listener_count(&self) -> usize {
        self.inner.lock().borrow().listeners().len()
    }

    /// Deliver `event` to every listener currently stored.
    ///
    /// Listeners are called in the order their slots were written. A
    /// failing listener does not stop delivery to the rest; all failures
    /// are returned together once everyone has been called.
    pub fn event(&self, event: ScopeEvent) -> Result<()> {
        let guard = self.inner.lock();
        let mut sink = FailureSink::default();
        self.broadcast(&guard, event, &mut sink);
        drop(guard);
        sink.finish()
    }

    fn broadcast(&self, contents: &RefCell<Contents>, event: ScopeEvent, sink: &mut FailureSink) {
        // Snapshot first so handlers can write to this context.
        let listeners = contents.borrow().listeners();
        for registered in &listeners {
            self.deliver(registered, event, sink);
        }
    }

    fn deliver(&self, registered: &Registered, event: ScopeEvent, sink: &mut FailureSink) {
        trace!(context = %self.id, listener = registered.type_name, %event, "delivering scope event");
        if let Err(error) = registered.listener.event(event) {
            warn!(
                context = %self.id,
                listener = registered.type_name,
                %event,
                %error,
                "scope listener failed"
            );
            sink.push(ListenerFailure {
                event,
                context: self.id,
                listener: registered.type_name,
                error,
            });
        }
    }
}

impl Default for ScopedContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScopedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedContext")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
