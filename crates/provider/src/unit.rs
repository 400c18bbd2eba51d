//! Unit-of-work boundary driver.

use std::marker::PhantomData;
use std::sync::Arc;

use threadscope_core::{Result, ScopeEvent, ScopeManager, ScopedContext};
use tracing::{debug, warn};

/// A unit of work active on the current thread.
///
/// [`begin`](Self::begin) installs the unit's context on the calling
/// thread. [`finish`](Self::finish), or dropping the guard, detaches it and
/// leaves a fresh empty context behind, which sends `LEAVE` to the unit's
/// listeners.
///
/// The guard is bound to the thread that created it. To continue the work
/// elsewhere, take [`context`](Self::context), finish here, and begin a new
/// unit with that context on the other thread.
#[must_use = "dropping the guard ends the unit of work immediately"]
pub struct UnitOfWork {
    manager: Arc<ScopeManager>,
    context: Arc<ScopedContext>,
    finished: bool,
    // Detaching must happen on the thread the context was installed on.
    _not_send: PhantomData<*const ()>,
}

impl UnitOfWork {
    /// Install `context`, or a fresh one when `None`, on the calling thread.
    ///
    /// If one of the unit's own listeners rejects the `ENTER`, the context
    /// is detached again and the failure is returned. Listeners of the
    /// previously current context failing their `LEAVE` do not abort the
    /// unit; those failures are logged.
    pub fn begin(manager: Arc<ScopeManager>, context: Option<Arc<ScopedContext>>) -> Result<Self> {
        let context = context.unwrap_or_else(|| Arc::new(ScopedContext::new()));
        debug!(context = %context.id(), "beginning unit of work");

        if let Err(err) = manager.change_scope(Some(context.clone())) {
            let failures = err.listener_failures();
            let rejected = failures.is_empty()
                || failures
                    .iter()
                    .any(|f| f.event == ScopeEvent::Enter && f.context == context.id());
            if rejected {
                if let Err(undo) = manager.change_scope(None) {
                    warn!(context = %context.id(), error = %undo, "failed to detach aborted unit of work");
                }
                return Err(err);
            }
            for failure in failures {
                warn!(context = %context.id(), %failure, "previous scope context left with listener failure");
            }
        }

        Ok(Self {
            manager,
            context,
            finished: false,
            _not_send: PhantomData,
        })
    }

    /// The unit's context, for handing to another thread.
    pub fn context(&self) -> Arc<ScopedContext> {
        self.context.clone()
    }

    /// End the unit of work on this thread.
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.detach()
    }

    fn detach(&self) -> Result<()> {
        debug!(context = %self.context.id(), "finishing unit of work");
        self.manager.change_scope(None)
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(error) = self.detach() {
            warn!(context = %self.context.id(), %error, "unit of work ended with listener failures");
        }
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("context", &self.context.id())
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScopedProvider;
    use threadscope_core::{Key, ListenerError, ScopeListener};

    #[derive(Default)]
    struct Recorder {
        events: parking_lot::Mutex<Vec<ScopeEvent>>,
    }

    impl ScopeListener for Recorder {
        fn event(&self, event: ScopeEvent) -> std::result::Result<(), ListenerError> {
            self.events.lock().push(event);
            Ok(())
        }
    }

    struct Grumpy;

    impl ScopeListener for Grumpy {
        fn event(&self, event: ScopeEvent) -> std::result::Result<(), ListenerError> {
            match event {
                ScopeEvent::Enter => Err(ListenerError::new("not today")),
                ScopeEvent::Leave => Ok(()),
            }
        }
    }

    #[test]
    fn test_begin_installs_and_finish_detaches() {
        let manager = Arc::new(ScopeManager::new());
        let unit = UnitOfWork::begin(manager.clone(), None).unwrap();
        let context = unit.context();
        assert!(Arc::ptr_eq(&context, &manager.get_context()));

        unit.finish().unwrap();
        assert!(!Arc::ptr_eq(&context, &manager.get_context()));
        assert!(manager.get_context().is_empty());
    }

    #[test]
    fn test_drop_detaches() {
        let manager = Arc::new(ScopeManager::new());
        let recorder = Arc::new(Recorder::default());
        {
            let unit = UnitOfWork::begin(manager.clone(), None).unwrap();
            unit.context().put_listener(&Key::of(), recorder.clone()).unwrap();
        }
        assert_eq!(*recorder.events.lock(), vec![ScopeEvent::Enter, ScopeEvent::Leave]);
    }

    #[test]
    fn test_begin_with_existing_context_sends_enter() {
        let manager = Arc::new(ScopeManager::new());
        let context = Arc::new(ScopedContext::new());
        let recorder = Arc::new(Recorder::default());
        context.put_listener(&Key::of(), recorder.clone()).unwrap();

        let unit = UnitOfWork::begin(manager.clone(), Some(context.clone())).unwrap();
        unit.finish().unwrap();

        assert_eq!(
            *recorder.events.lock(),
            vec![ScopeEvent::Enter, ScopeEvent::Enter, ScopeEvent::Leave]
        );
    }

    #[test]
    fn test_rejected_enter_aborts() {
        let manager = Arc::new(ScopeManager::new());
        let context = Arc::new(ScopedContext::new());
        let _ = context.put_listener(&Key::of(), Arc::new(Grumpy));

        let err = UnitOfWork::begin(manager.clone(), Some(context.clone())).unwrap_err();
        assert_eq!(err.listener_failures().len(), 1);
        assert!(!Arc::ptr_eq(&context, &manager.get_context()));
    }

    struct SulkyLeaver;

    impl ScopeListener for SulkyLeaver {
        fn event(&self, event: ScopeEvent) -> std::result::Result<(), ListenerError> {
            match event {
                ScopeEvent::Enter => Ok(()),
                ScopeEvent::Leave => Err(ListenerError::new("won't go")),
            }
        }
    }

    #[test]
    fn test_previous_leave_failure_does_not_abort() {
        let manager = Arc::new(ScopeManager::new());
        manager
            .get_context()
            .put_listener(&Key::of(), Arc::new(SulkyLeaver))
            .unwrap();

        let incoming = Arc::new(ScopedContext::new());
        let recorder = Arc::new(Recorder::default());
        incoming.put_listener(&Key::of(), recorder.clone()).unwrap();

        let unit = UnitOfWork::begin(manager.clone(), Some(incoming.clone())).unwrap();
        assert!(Arc::ptr_eq(&incoming, &manager.get_context()));
        assert_eq!(*recorder.events.lock(), vec![ScopeEvent::Enter, ScopeEvent::Enter]);

        unit.finish().unwrap();
        assert_eq!(
            *recorder.events.lock(),
            vec![ScopeEvent::Enter, ScopeEvent::Enter, ScopeEvent::Leave]
        );
    }

    #[test]
    fn test_provider_values_differ_across_the_boundary() {
        let manager = Arc::new(ScopeManager::new());
        let provider = ScopedProvider::new(manager.clone(), Key::<String>::of(), || "obj".to_string());

        let t1 = provider.get().unwrap();
        let unit = UnitOfWork::begin(manager.clone(), None).unwrap();
        let t2 = provider.get().unwrap();
        unit.finish().unwrap();
        let t3 = provider.get().unwrap();

        assert!(!Arc::ptr_eq(&t1, &t2));
        assert!(!Arc::ptr_eq(&t1, &t3));
        assert!(!Arc::ptr_eq(&t2, &t3));
    }
}
