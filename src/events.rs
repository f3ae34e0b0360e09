//! Listener registries for client events
//!
//! Listeners are invoked synchronously, in registration order, on whichever
//! task raises the event. A panicking listener is logged and skipped so the
//! remaining listeners and the connection supervisor keep running.

use crate::error::ClientError;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::error;

/// Ordered set of listeners receiving `&A`
pub struct ListenerSet<A: ?Sized> {
    listeners: RwLock<Vec<Arc<dyn Fn(&A) + Send + Sync>>>,
}

impl<A: ?Sized> ListenerSet<A> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Append a listener; registering the same closure twice runs it twice
    pub fn add<F>(&self, listener: F)
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        write_unpoisoned(&self.listeners).push(Arc::new(listener));
    }

    pub fn len(&self) -> usize {
        read_unpoisoned(&self.listeners).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every listener and return how many ran to completion
    pub fn emit(&self, event: &A) -> usize {
        // Snapshot so listeners may register further listeners without deadlocking
        let snapshot = read_unpoisoned(&self.listeners).clone();

        let mut completed = 0;
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => completed += 1,
                Err(_) => error!("Event listener panicked; continuing with remaining listeners"),
            }
        }
        completed
    }
}

impl<A: ?Sized> Default for ListenerSet<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ?Sized> fmt::Debug for ListenerSet<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Connection lifecycle listeners: `connect`, `disconnect` and `error`
#[derive(Debug, Default)]
pub struct LifecycleListeners {
    pub connect: ListenerSet<()>,
    /// Receives the reason the session ended
    pub disconnect: ListenerSet<str>,
    pub error: ListenerSet<ClientError>,
}

impl LifecycleListeners {
    pub fn new() -> Self {
        Self::default()
    }
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read_unpoisoned<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_unpoisoned<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_listeners_run_in_registration_order() {
        let set: ListenerSet<str> = ListenerSet::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            set.add(move |reason: &str| {
                seen.lock().unwrap().push(format!("{label}:{reason}"));
            });
        }

        assert_eq!(set.emit("lost"), 3);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:lost", "second:lost", "third:lost"]
        );
    }

    #[test]
    fn test_same_listener_registered_twice_runs_twice() {
        let set: ListenerSet<()> = ListenerSet::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let listener = {
            let calls = Arc::clone(&calls);
            move |_: &()| {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        };
        set.add(listener.clone());
        set.add(listener);

        set.emit(&());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let set: ListenerSet<()> = ListenerSet::new();
        let calls = Arc::new(AtomicUsize::new(0));

        set.add(|_: &()| panic!("listener bug"));
        let counter = Arc::clone(&calls);
        set.add(move |_: &()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(set.emit(&()), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emit_without_listeners() {
        let lifecycle = LifecycleListeners::new();
        assert!(lifecycle.error.is_empty());
        assert_eq!(lifecycle.error.emit(&ClientError::NoRuntime), 0);
    }
}
