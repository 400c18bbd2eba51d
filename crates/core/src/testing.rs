//! Listeners shared by the unit tests.

use parking_lot::Mutex;

use crate::event::{ListenerError, ScopeEvent, ScopeListener};

/// Records every event it receives.
#[derive(Debug, Default)]
pub(crate) struct EventRecorder {
    events: Mutex<Vec<ScopeEvent>>,
}

impl EventRecorder {
    pub(crate) fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub(crate) fn last(&self) -> Option<ScopeEvent> {
        self.events.lock().last().copied()
    }

    pub(crate) fn events(&self) -> Vec<ScopeEvent> {
        self.events.lock().clone()
    }
}

impl ScopeListener for EventRecorder {
    fn event(&self, event: ScopeEvent) -> Result<(), ListenerError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Fails on every event.
#[derive(Debug)]
pub(crate) struct FailingListener {
    message: &'static str,
}

impl FailingListener {
    pub(crate) fn new(message: &'static str) -> Self {
        Self { message }
    }
}

impl ScopeListener for FailingListener {
    fn event(&self, _event: ScopeEvent) -> Result<(), ListenerError> {
        Err(ListenerError::new(self.message))
    }
}
