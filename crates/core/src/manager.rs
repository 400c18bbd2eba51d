//! Per-thread current context and the hand-off between contexts.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::context::ScopedContext;
use crate::error::{FailureSink, Result};
use crate::event::ScopeEvent;

#[derive(Debug, Default)]
struct Registry {
    slots: Mutex<HashMap<ThreadId, Arc<ScopedContext>>>,
}

impl Registry {
    fn remove(&self, thread: ThreadId) -> Option<Arc<ScopedContext>> {
        self.slots.lock().remove(&thread)
    }
}

/// Drops a thread's entry from one manager when the thread exits.
struct ExitGuard {
    registry: Weak<Registry>,
    thread: ThreadId,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let Some(context) = registry.remove(self.thread) else {
            return;
        };
        debug!(thread = ?self.thread, context = %context.id(), "thread exited, leaving scope context");
        if let Err(error) = context.event(ScopeEvent::Leave) {
            warn!(thread = ?self.thread, %error, "scope context left with listener failures on thread exit");
        }
    }
}

thread_local! {
    static EXIT_GUARDS: RefCell<Vec<ExitGuard>> = const { RefCell::new(Vec::new()) };
}

/// Tracks which [`ScopedContext`] is current on each thread.
///
/// Construct one per application and share it as `Arc<ScopeManager>`.
/// A thread only ever reads and writes its own entry; moving a unit of work
/// to another thread means handing its context over and calling
/// [`change_scope`](Self::change_scope) there.
///
/// A thread's entry is removed when the thread exits, and its context's
/// listeners get `LEAVE` at that point.
#[derive(Debug, Default)]
pub struct ScopeManager {
    registry: Arc<Registry>,
}

impl ScopeManager {
    /// Create a manager with no contexts installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// The calling thread's current context, created on first use.
    ///
    /// Calls with no `change_scope` in between return the same instance.
    pub fn get_context(&self) -> Arc<ScopedContext> {
        if let Some(context) = self.current() {
            return context;
        }

        // Equivalent to change_scope(None) with nothing installed: no LEAVE,
        // and the ENTER on a fresh context has nobody to reach.
        let fresh = Arc::new(ScopedContext::new());
        let thread = thread::current().id();
        debug!(?thread, context = %fresh.id(), "installing fresh scope context");
        self.install(thread, fresh.clone());
        fresh
    }

    /// The calling thread's current context, without creating one.
    pub fn current(&self) -> Option<Arc<ScopedContext>> {
        self.registry.slots.lock().get(&thread::current().id()).cloned()
    }

    /// Make `next` the calling thread's current context.
    ///
    /// `None` installs a brand-new empty context. Passing the context that
    /// is already current does nothing. Otherwise the outgoing context's
    /// listeners get `LEAVE` and the incoming context's listeners get
    /// `ENTER`, in that order.
    ///
    /// The hand-off is always completed. Listener failures from either
    /// broadcast are returned together afterwards.
    pub fn change_scope(&self, next: Option<Arc<ScopedContext>>) -> Result<()> {
        let thread = thread::current().id();
        let old = self.current();

        if let (Some(next), Some(old)) = (&next, &old) {
            if Arc::ptr_eq(next, old) {
                trace!(?thread, context = %old.id(), "scope already current");
                return Ok(());
            }
        }

        let mut sink = FailureSink::default();
        if let Some(old) = &old {
            sink.absorb(old.event(ScopeEvent::Leave))?;
            self.registry.remove(thread);
        }

        let next = next.unwrap_or_else(|| Arc::new(ScopedContext::new()));
        debug!(
            ?thread,
            from = ?old.as_ref().map(|c| c.id()),
            to = %next.id(),
            "changing scope"
        );
        self.install(thread, next.clone());

        sink.absorb(next.event(ScopeEvent::Enter))?;
        sink.finish()
    }

    /// Shorthand for `change_scope(Some(context))`.
    pub fn enter(&self, context: Arc<ScopedContext>) -> Result<()> {
        self.change_scope(Some(context))
    }

    /// Shorthand for `change_scope(None)`.
    pub fn detach(&self) -> Result<()> {
        self.change_scope(None)
    }

    /// Drop the calling thread's entry now, sending `LEAVE` to its listeners.
    ///
    /// Thread exit does the same automatically; calling this first lets the
    /// caller see listener failures. The next `get_context` on this thread
    /// starts over with a fresh context.
    pub fn release(&self) -> Result<()> {
        let thread = thread::current().id();
        match self.registry.remove(thread) {
            Some(old) => {
                debug!(?thread, context = %old.id(), "releasing scope context");
                old.event(ScopeEvent::Leave)
            }
            None => Ok(()),
        }
    }

    /// Number of live threads with a context installed.
    pub fn thread_count(&self) -> usize {
        self.registry.slots.lock().len()
    }

    fn install(&self, thread: ThreadId, context: Arc<ScopedContext>) {
        let previous = self.registry.slots.lock().insert(thread, context);
        if previous.is_none() {
            self.watch_thread_exit(thread);
        }
    }

    fn watch_thread_exit(&self, thread: ThreadId) {
        let registry = Arc::downgrade(&self.registry);
        // Fails only while this thread's locals are being torn down.
        let _ = EXIT_GUARDS.try_with(|guards| {
            let mut guards = guards.borrow_mut();
            guards.retain(|guard| guard.registry.strong_count() > 0);
            if !guards.iter().any(|guard| Weak::ptr_eq(&guard.registry, &registry)) {
                guards.push(ExitGuard { registry, thread });
            }
        });
    }
}
