//! Callback values that can cross the process boundary
//!
//! A [`Callback`] is a shared function handle. Its identity is the identity of
//! the shared allocation: clones of one `Callback` are "the same function",
//! while two `Callback::new` calls are distinct even for identical closures.
//! The bridge keys its registry on that identity, so passing the same handle
//! in many calls reuses one callback id.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use serde_json::Value;

use rnp_core::prelude::*;

type CallbackFn = dyn Fn(Vec<Value>) + Send + Sync;

/// Opaque identity of a callback handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackIdentity(usize);

/// A function that can be passed as a call argument
#[derive(Clone)]
pub struct Callback {
    f: Arc<CallbackFn>,
}

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Invoke the function. A panic inside it is logged, never propagated.
    pub fn invoke(&self, args: Vec<Value>) {
        if catch_unwind(AssertUnwindSafe(|| (self.f)(args))).is_err() {
            error!("Callback panicked during invocation");
        }
    }

    pub fn identity(&self) -> CallbackIdentity {
        CallbackIdentity(Arc::as_ptr(&self.f) as *const () as usize)
    }

    pub fn same_as(&self, other: &Callback) -> bool {
        self.identity() == other.identity()
    }

    pub(crate) fn downgrade(&self) -> WeakCallback {
        WeakCallback {
            f: Arc::downgrade(&self.f),
        }
    }
}

/// Non-owning reference to a [`Callback`]
#[derive(Clone)]
pub(crate) struct WeakCallback {
    f: Weak<CallbackFn>,
}

impl WeakCallback {
    pub fn upgrade(&self) -> Option<Callback> {
        self.f.upgrade().map(|f| Callback { f })
    }

    pub fn is_alive(&self) -> bool {
        self.f.strong_count() > 0
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callback").field(&self.identity()).finish()
    }
}

/// Local callbacks that have been sent to the peer, by identity and by id.
///
/// Entries hold a strong reference, so an identity cannot be recycled by a
/// new allocation while it is registered.
#[derive(Debug, Default)]
pub(crate) struct CallbackRegistry {
    ids: HashMap<CallbackIdentity, u64>,
    callbacks: HashMap<u64, Callback>,
}

impl CallbackRegistry {
    /// Id for `callback`, allocating one with `next_id` on first sight
    pub fn register(&mut self, callback: &Callback, next_id: impl FnOnce() -> u64) -> u64 {
        if let Some(id) = self.ids.get(&callback.identity()) {
            return *id;
        }
        let id = next_id();
        self.ids.insert(callback.identity(), id);
        self.callbacks.insert(id, callback.clone());
        id
    }

    pub fn get(&self, id: u64) -> Option<Callback> {
        self.callbacks.get(&id).cloned()
    }

    /// Forget `callback`, returning the id it had
    pub fn release(&mut self, callback: &Callback) -> Option<u64> {
        let id = self.ids.remove(&callback.identity())?;
        self.callbacks.remove(&id);
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_clones_share_identity() {
        let a = Callback::new(|_| {});
        let b = a.clone();
        let c = Callback::new(|_| {});

        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }

    #[test]
    fn test_registry_dedupes_by_identity() {
        let mut registry = CallbackRegistry::default();
        let mut counter = 0;
        let mut next = || {
            counter += 1;
            counter
        };

        let a = Callback::new(|_| {});
        let c = Callback::new(|_| {});

        let id_a = registry.register(&a, &mut next);
        let id_a_again = registry.register(&a.clone(), &mut next);
        let id_c = registry.register(&c, &mut next);

        assert_eq!(id_a, id_a_again);
        assert_ne!(id_a, id_c);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_registry_release() {
        let mut registry = CallbackRegistry::default();
        let a = Callback::new(|_| {});

        let id = registry.register(&a, || 1);
        assert_eq!(registry.release(&a), Some(id));
        assert!(registry.get(id).is_none());
        assert_eq!(registry.release(&a), None);

        // Registering again allocates a fresh id
        assert_eq!(registry.register(&a, || 2), 2);
    }

    #[test]
    fn test_invoke_passes_args_and_survives_panic() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let counting = Callback::new(move |args| {
            hits_clone.fetch_add(args.len(), Ordering::SeqCst);
        });
        counting.invoke(vec![Value::Null, Value::Bool(true)]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let panicking = Callback::new(|_| panic!("boom"));
        panicking.invoke(vec![]);
    }
}
