//! Per-unit-of-work cached values.

use std::sync::Arc;

use threadscope_core::{Key, Result, ScopeListener, ScopeManager, ScopedContext};
use tracing::debug;

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;
type Store<T> = fn(&ScopedContext, &Key<T>, Arc<T>) -> Result<()>;

/// Provides one `T` per context.
///
/// The first [`get`](Self::get) in a context builds the value with the
/// factory and stores it under the provider's key; later calls in the same
/// context return that instance. A different context (a new request, or
/// the fresh context left behind after a unit of work ends) gets its own.
pub struct ScopedProvider<T> {
    manager: Arc<ScopeManager>,
    key: Key<T>,
    factory: Factory<T>,
    store: Store<T>,
}

impl<T: Send + Sync + 'static> ScopedProvider<T> {
    /// Create a provider storing plain values.
    pub fn new(
        manager: Arc<ScopeManager>,
        key: Key<T>,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            manager,
            key,
            factory: Box::new(factory),
            store: |context, key, value| context.put(key, Some(value)),
        }
    }

    /// The key values are cached under.
    pub fn key(&self) -> &Key<T> {
        &self.key
    }

    /// The value for the calling thread's current context.
    pub fn get(&self) -> Result<Arc<T>> {
        self.get_in(&self.manager.get_context())
    }

    /// The value for an explicit context, which need not be current.
    ///
    /// The lookup, the factory call and the insert all happen under the
    /// context's lock, so concurrent callers on one context share a single
    /// instance. The factory must therefore be quick, and must not wait on
    /// another thread that uses the same context.
    pub fn get_in(&self, context: &ScopedContext) -> Result<Arc<T>> {
        context.locked(|context| {
            if let Some(value) = context.get(&self.key)? {
                return Ok(value);
            }

            debug!(key = %self.key, context = %context.id(), "provisioning scoped value");
            let value = Arc::new((self.factory)());
            (self.store)(context, &self.key, value.clone())?;
            Ok(value)
        })
    }
}

impl<T: ScopeListener + 'static> ScopedProvider<T> {
    /// Create a provider whose values are stored as listeners, so each one
    /// hears `ENTER` and `LEAVE` for the context it was built in.
    pub fn listening(
        manager: Arc<ScopeManager>,
        key: Key<T>,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            manager,
            key,
            factory: Box::new(factory),
            store: |context, key, value| context.put_listener(key, value),
        }
    }
}

impl<T> std::fmt::Debug for ScopedProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedProvider")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use threadscope_core::{ListenerError, ScopeEvent};

    #[test]
    fn test_same_context_same_instance() {
        let manager = Arc::new(ScopeManager::new());
        let provider = ScopedProvider::new(manager.clone(), Key::<Vec<u8>>::of(), Vec::new);

        let a = provider.get().unwrap();
        let b = provider.get().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.get_context().size(), 1);
    }

    #[test]
    fn test_factory_runs_once_per_context() {
        let manager = Arc::new(ScopeManager::new());
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let provider = ScopedProvider::new(manager.clone(), Key::<usize>::named("n"), move || {
            counter.fetch_add(1, Ordering::SeqCst)
        });

        let first = provider.get().unwrap();
        provider.get().unwrap();
        manager.detach().unwrap();
        let second = provider.get().unwrap();

        assert_eq!((*first, *second), (0, 1));
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_get_in_explicit_context() {
        let manager = Arc::new(ScopeManager::new());
        let provider = ScopedProvider::new(manager.clone(), Key::<String>::of(), || "x".to_string());
        let elsewhere = ScopedContext::new();

        let value = provider.get_in(&elsewhere).unwrap();
        assert!(Arc::ptr_eq(&value, &elsewhere.get(provider.key()).unwrap().unwrap()));
        assert!(manager.current().is_none());
    }

    #[test]
    fn test_concurrent_misses_share_one_instance() {
        let manager = Arc::new(ScopeManager::new());
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let provider = ScopedProvider::new(manager, Key::<usize>::of(), move || {
            std::thread::yield_now();
            counter.fetch_add(1, Ordering::SeqCst)
        });
        let shared = ScopedContext::new();
        let barrier = std::sync::Barrier::new(8);

        let values: Vec<Arc<usize>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        provider.get_in(&shared).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    }

    #[test]
    fn test_blank_key_propagates() {
        let manager = Arc::new(ScopeManager::new());
        let provider = ScopedProvider::new(manager, Key::<u8>::named(""), || 0);
        assert!(provider.get().is_err());
    }

    #[derive(Default)]
    struct Session {
        events: parking_lot::Mutex<Vec<ScopeEvent>>,
    }

    impl ScopeListener for Session {
        fn event(&self, event: ScopeEvent) -> std::result::Result<(), ListenerError> {
            self.events.lock().push(event);
            Ok(())
        }
    }

    #[test]
    fn test_listening_provider_registers_values() {
        let manager = Arc::new(ScopeManager::new());
        let provider = ScopedProvider::listening(manager.clone(), Key::<Session>::of(), Session::default);

        let session = provider.get().unwrap();
        assert_eq!(*session.events.lock(), vec![ScopeEvent::Enter]);

        manager.detach().unwrap();
        assert_eq!(*session.events.lock(), vec![ScopeEvent::Enter, ScopeEvent::Leave]);
    }
}
