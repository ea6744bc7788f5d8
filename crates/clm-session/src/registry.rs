//! Dispatch registry
//!
//! Correlates the thread currently inside a dispatch call with the session it
//! is dispatching, so notifications delivered by the membership service can
//! be routed back without the session crossing the service boundary.

use std::thread::ThreadId;

use clm_core::ClmError;
use dashmap::{DashMap, mapref::entry::Entry};

/// Map from dispatching thread to the session it is dispatching.
///
/// Backed by a sharded map, so bind/unbind/resolve from different threads
/// only contend when their keys share a shard.
pub struct DispatchRegistry<S> {
    bindings: DashMap<ThreadId, S>,
}

impl<S: Clone> DispatchRegistry<S> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
        }
    }

    /// Bind `session` to `context` until the returned guard drops.
    ///
    /// # Errors
    /// Returns `ReentrantDispatch` if `context` is already bound; `label`
    /// names the session holding the binding.
    pub fn bind<F>(
        &self,
        context: ThreadId,
        session: S,
        label: F,
    ) -> Result<Binding<'_, S>, ClmError>
    where
        F: FnOnce(&S) -> u64,
    {
        match self.bindings.entry(context) {
            Entry::Occupied(bound) => Err(ClmError::ReentrantDispatch(label(bound.get()))),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(Binding {
                    registry: self,
                    context,
                })
            }
        }
    }

    /// Remove the binding for `context`, if any.
    pub fn unbind(&self, context: ThreadId) {
        self.bindings.remove(&context);
    }

    /// The session bound to `context`.
    ///
    /// The value is cloned out so no shard lock is held while the caller
    /// runs client code.
    #[must_use]
    pub fn resolve(&self, context: ThreadId) -> Option<S> {
        self.bindings.get(&context).map(|entry| entry.value().clone())
    }

    /// Whether `context` is currently bound.
    #[must_use]
    pub fn is_bound(&self, context: ThreadId) -> bool {
        self.bindings.contains_key(&context)
    }

    /// Number of threads currently dispatching.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl<S: Clone> Default for DispatchRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped binding; unbinds on drop, including during unwinding.
pub struct Binding<'a, S: Clone> {
    registry: &'a DispatchRegistry<S>,
    context: ThreadId,
}

impl<S: Clone> Binding<'_, S> {
    #[must_use]
    pub const fn context(&self) -> ThreadId {
        self.context
    }
}

impl<S: Clone> Drop for Binding<'_, S> {
    fn drop(&mut self) {
        self.registry.unbind(self.context);
    }
}
