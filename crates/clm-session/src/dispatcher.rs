//! Dispatcher for routing service notifications to session callbacks.

use std::{
    fmt,
    sync::Arc,
    thread::{self, ThreadId},
};

use clm_core::{
    AisStatus, ClmError, ClusterNode, ClusterNotificationBuffer, DispatchPolicy, Invocation,
    MembershipService, NotificationSink,
};

use crate::{registry::DispatchRegistry, session::Session};

struct Inner {
    service: Arc<dyn MembershipService>,
    registry: DispatchRegistry<Arc<Session>>,
}

/// Owns the dispatch registry and the service handles dispatch through.
///
/// Cheap to clone; clones share the registry. Every handle initialized
/// through a dispatcher keeps it alive.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a dispatcher over `service`.
    #[must_use]
    pub fn new(service: Arc<dyn MembershipService>) -> Self {
        Self {
            inner: Arc::new(Inner {
                service,
                registry: DispatchRegistry::new(),
            }),
        }
    }

    /// The underlying membership service.
    #[must_use]
    pub fn service(&self) -> &dyn MembershipService {
        self.inner.service.as_ref()
    }

    /// Whether `context` is inside a dispatch call.
    #[must_use]
    pub fn is_dispatching(&self, context: ThreadId) -> bool {
        self.inner.registry.is_bound(context)
    }

    /// Number of threads currently inside a dispatch call.
    #[must_use]
    pub fn active_dispatches(&self) -> usize {
        self.inner.registry.len()
    }

    /// Run one dispatch call for `session` on the calling thread.
    pub(crate) fn dispatch(
        &self,
        session: &Arc<Session>,
        policy: DispatchPolicy,
    ) -> Result<(), ClmError> {
        let _dispatching = session.begin_dispatch()?;

        if policy.blocks() {
            session.ensure_readiness(self.service())?;
        }

        let context = thread::current().id();
        let _binding = self
            .inner
            .registry
            .bind(context, Arc::clone(session), |bound| bound.handle().as_raw())?;

        tracing::trace!(handle = %session.handle(), ?policy, "Dispatching");
        let result = self
            .inner
            .service
            .dispatch(session.handle(), policy, &*self.inner);

        if let Err(ref e) = result {
            tracing::debug!(handle = %session.handle(), ?policy, error = %e, "Dispatch failed");
        }
        result
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("active_dispatches", &self.active_dispatches())
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// The session dispatching on the calling thread.
    ///
    /// # Panics
    /// Panics if the service delivers outside a dispatch call on this thread.
    fn current_session(&self) -> Arc<Session> {
        let context = thread::current().id();
        match self.registry.resolve(context) {
            Some(session) => session,
            None => panic!(
                "membership service contract violated: \
                 notification delivered on {context:?} outside dispatch"
            ),
        }
    }
}

impl NotificationSink for Inner {
    fn deliver_cluster_node(&self, invocation: Invocation, node: Option<ClusterNode>, status: i32) {
        let status = AisStatus::from_code(status);
        let session = self.current_session();

        match session.callbacks().get_cluster_node() {
            Some(callback) => callback.get_cluster_node(invocation, node.as_ref(), status),
            None => tracing::trace!(
                handle = %session.handle(),
                ?invocation,
                "No node lookup callback registered, dropping notification"
            ),
        }
    }

    fn deliver_track_cluster(
        &self,
        buffer: ClusterNotificationBuffer,
        number_of_members: u32,
        status: i32,
    ) {
        let status = AisStatus::from_code(status);
        let session = self.current_session();

        match session.callbacks().track_cluster() {
            Some(callback) => callback.track_cluster(&buffer, number_of_members, status),
            None => tracing::trace!(
                handle = %session.handle(),
                view = buffer.view_number,
                "No track callback registered, dropping notification"
            ),
        }
    }
}
