//! Walkthrough of a single context being promoted, replaced and restored
//! on one thread.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use threadscope_core::{Key, ListenerError, ScopeEvent, ScopeListener, ScopeManager, ScopedContext};

/// Event count observed after one step.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioStep {
    pub step: &'static str,
    pub events: usize,
    pub last: Option<ScopeEvent>,
    pub plate_is_current: bool,
}

#[derive(Debug, Default)]
struct Counter {
    seen: Mutex<Vec<ScopeEvent>>,
}

impl ScopeListener for Counter {
    fn event(&self, event: ScopeEvent) -> Result<(), ListenerError> {
        self.seen.lock().push(event);
        Ok(())
    }
}

/// Run the walkthrough against a fresh manager.
pub fn run() -> Result<Vec<ScenarioStep>> {
    let manager = ScopeManager::new();
    let plate = Arc::new(ScopedContext::new());
    let counter = Arc::new(Counter::default());
    let mut steps = Vec::new();

    let mut record = |step: &'static str, manager: &ScopeManager| {
        let seen = counter.seen.lock();
        steps.push(ScenarioStep {
            step,
            events: seen.len(),
            last: seen.last().copied(),
            plate_is_current: manager
                .current()
                .is_some_and(|current| Arc::ptr_eq(&current, &plate)),
        });
    };

    plate.put_listener(&Key::named("foo"), counter.clone())?;
    record("put listener", &manager);

    manager.change_scope(Some(plate.clone()))?;
    record("promote plate", &manager);

    manager.change_scope(None)?;
    record("detach", &manager);

    manager.change_scope(Some(plate.clone()))?;
    record("promote plate again", &manager);

    manager.change_scope(Some(Arc::new(ScopedContext::new())))?;
    record("replace with empty context", &manager);

    manager.change_scope(Some(plate.clone()))?;
    record("restore plate", &manager);

    manager.change_scope(Some(plate.clone()))?;
    record("promote plate onto itself", &manager);

    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_match_walkthrough() {
        let steps = run().unwrap();
        let counts: Vec<_> = steps.iter().map(|s| (s.events, s.last)).collect();
        assert_eq!(
            counts,
            vec![
                (1, Some(ScopeEvent::Enter)),
                (2, Some(ScopeEvent::Enter)),
                (3, Some(ScopeEvent::Leave)),
                (4, Some(ScopeEvent::Enter)),
                (5, Some(ScopeEvent::Leave)),
                (6, Some(ScopeEvent::Enter)),
                (6, Some(ScopeEvent::Enter)),
            ]
        );
        let current: Vec<_> = steps.iter().map(|s| s.plate_is_current).collect();
        assert_eq!(current, vec![false, true, false, true, false, true, true]);
    }
}
