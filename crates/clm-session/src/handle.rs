//! Client handle for one initialization of the membership service.

use std::{fmt, sync::Arc, time::Duration};

use clm_core::{ClmError, DispatchPolicy, SelectionObject, SessionHandle, Version};

use crate::{
    dispatcher::Dispatcher,
    session::{Callbacks, Session, SessionState},
};

/// Handle designating one initialization of the membership service.
///
/// Every [`initialize`](Self::initialize) call opens a new, independent
/// session. A handle may be shared between threads, but only one thread can
/// dispatch it at a time; a concurrent dispatch or finalize fails with
/// [`ClmError::DispatchInProgress`].
///
/// Dropping an active handle finalizes it.
pub struct ClmHandle {
    dispatcher: Dispatcher,
    session: Arc<Session>,
}

impl ClmHandle {
    /// Initialize the service and register `callbacks`.
    ///
    /// # Errors
    /// Returns `VersionMismatch` if no compatible version exists, or the
    /// service's `InvalidParam`, `TryAgain`, `NoMemory`, `NoResources`,
    /// `Timeout` or `Library` failure.
    pub fn initialize(
        dispatcher: &Dispatcher,
        callbacks: Callbacks,
        version: Version,
    ) -> Result<Self, ClmError> {
        let (handle, negotiated) = dispatcher.service().initialize(version)?;
        if !handle.is_initialized() {
            tracing::error!(requested = %version, "Service issued the uninitialized handle");
            return Err(ClmError::Library);
        }

        tracing::debug!(
            %handle,
            requested = %version,
            %negotiated,
            ?callbacks,
            "Initialized CLM handle"
        );

        Ok(Self {
            dispatcher: dispatcher.clone(),
            session: Arc::new(Session::active(handle, negotiated, callbacks)),
        })
    }

    /// Identifier issued by the service.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        self.session.handle()
    }

    /// Version negotiated on initialize.
    #[must_use]
    pub fn version(&self) -> Version {
        self.session.version()
    }

    /// Whether the handle has not been finalized.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self.session.state(),
            SessionState::Active | SessionState::Dispatching
        )
    }

    /// Deliver pending notifications to the registered callbacks.
    ///
    /// Callbacks run on the calling thread before this returns. A
    /// notification for which no callback was registered is dropped.
    ///
    /// # Errors
    /// Returns `BadHandle` after finalize, `DispatchInProgress` if another
    /// thread is dispatching this handle, `ReentrantDispatch` if called from
    /// a callback of another handle, `Timeout` when a bounded policy expires,
    /// or the service's failure.
    pub fn dispatch(&self, policy: DispatchPolicy) -> Result<(), ClmError> {
        self.dispatcher.dispatch(&self.session, policy)
    }

    /// Block until at least one notification has been delivered.
    ///
    /// # Errors
    /// See [`dispatch`](Self::dispatch).
    pub fn dispatch_blocking(&self) -> Result<(), ClmError> {
        self.dispatch(DispatchPolicy::Blocking)
    }

    /// Block until one notification has been delivered or `timeout` elapses.
    ///
    /// # Errors
    /// Returns `Timeout` if nothing was delivered in time; otherwise see
    /// [`dispatch`](Self::dispatch).
    pub fn dispatch_blocking_timeout(&self, timeout: Duration) -> Result<(), ClmError> {
        self.dispatch(DispatchPolicy::BlockingFor(timeout))
    }

    /// Whether notifications are pending, without waiting.
    ///
    /// # Errors
    /// Returns `BadHandle` after finalize, or the service's failure to
    /// provide a readiness source.
    pub fn has_pending_callback(&self) -> Result<bool, ClmError> {
        self.has_pending_callback_timeout(Duration::ZERO)
    }

    /// Whether notifications become pending within `timeout`.
    ///
    /// # Errors
    /// See [`has_pending_callback`](Self::has_pending_callback).
    pub fn has_pending_callback_timeout(&self, timeout: Duration) -> Result<bool, ClmError> {
        self.session.wait_pending(self.dispatcher.service(), timeout)
    }

    /// Raw selection object for use in an external poll set.
    ///
    /// Valid until the handle is finalized.
    ///
    /// # Errors
    /// See [`has_pending_callback`](Self::has_pending_callback).
    pub fn selection_object(&self) -> Result<SelectionObject, ClmError> {
        self.session.selection_object(self.dispatcher.service())
    }

    /// Close the session.
    ///
    /// The handle becomes unusable even if the service reports a failure.
    /// The readiness source is released before the identifier is.
    ///
    /// # Errors
    /// Returns `BadHandle` if already finalized, `DispatchInProgress` while
    /// a dispatch is running, or the service's failure.
    pub fn finalize(&self) -> Result<(), ClmError> {
        self.session.begin_finalize()?;
        self.session.release_readiness();

        let handle = self.session.handle();
        match self.dispatcher.service().finalize(handle) {
            Ok(()) => {
                tracing::debug!(%handle, "Finalized CLM handle");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(%handle, error = %e, "Service failed to finalize CLM handle");
                Err(e)
            }
        }
    }
}

impl Drop for ClmHandle {
    fn drop(&mut self) {
        if self.session.state() != SessionState::Active {
            return;
        }
        if let Err(e) = self.finalize() {
            tracing::warn!(handle = %self.session.handle(), error = %e, "Finalize on drop failed");
        }
    }
}

impl fmt::Debug for ClmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClmHandle")
            .field("handle", &self.session.handle())
            .field("version", &self.session.version())
            .field("state", &self.session.state())
            .field("callbacks", self.session.callbacks())
            .finish()
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::{collections::HashSet, thread, time::Instant};

    use clm_core::{AisStatus, ClusterNotificationBuffer, Invocation};
    use parking_lot::Mutex;

    use super::*;
    use crate::service::{MemoryMembershipService, ServiceEvent};

    fn setup() -> (Arc<MemoryMembershipService>, Dispatcher) {
        let service = Arc::new(MemoryMembershipService::new());
        let dispatcher = Dispatcher::new(service.clone());
        (service, dispatcher)
    }

    #[test]
    fn test_initialize_yields_distinct_handles() {
        let (service, dispatcher) = setup();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                ClmHandle::initialize(&dispatcher, Callbacks::new(), Version::default()).unwrap()
            })
            .collect();

        let ids: HashSet<_> = handles.iter().map(ClmHandle::handle).collect();
        assert_eq!(ids.len(), handles.len());
        assert!(ids.iter().all(|h| h.is_initialized()));
        assert_eq!(service.session_count(), 16);
    }

    #[test]
    fn test_initialize_propagates_service_failure() {
        let (service, dispatcher) = setup();
        service.fail_next_initialize(ClmError::NoMemory);
        let err = ClmHandle::initialize(&dispatcher, Callbacks::new(), Version::default())
            .unwrap_err();
        assert_eq!(err, ClmError::NoMemory);

        let err = ClmHandle::initialize(&dispatcher, Callbacks::new(), Version::new('C', 1, 0))
            .unwrap_err();
        assert!(matches!(err, ClmError::VersionMismatch { .. }));
        assert_eq!(service.session_count(), 0);
    }

    #[test]
    fn test_negotiated_version_recorded() {
        let (_service, dispatcher) = setup();
        let handle =
            ClmHandle::initialize(&dispatcher, Callbacks::new(), Version::new('B', 1, 0)).unwrap();
        assert_eq!(handle.version(), Version::new('B', 1, 1));
    }

    #[test]
    fn test_double_finalize_is_bad_handle() {
        let (_service, dispatcher) = setup();
        let handle =
            ClmHandle::initialize(&dispatcher, Callbacks::new(), Version::default()).unwrap();
        handle.finalize().unwrap();
        assert!(!handle.is_active());
        assert_eq!(handle.finalize().unwrap_err(), ClmError::BadHandle);
    }

    #[test]
    fn test_finalized_handle_rejects_everything() {
        let (_service, dispatcher) = setup();
        let handle =
            ClmHandle::initialize(&dispatcher, Callbacks::new(), Version::default()).unwrap();
        handle.finalize().unwrap();

        for policy in [
            DispatchPolicy::One,
            DispatchPolicy::Available,
            DispatchPolicy::Blocking,
            DispatchPolicy::BlockingFor(Duration::ZERO),
        ] {
            assert_eq!(handle.dispatch(policy).unwrap_err(), ClmError::BadHandle);
        }
        assert_eq!(handle.has_pending_callback().unwrap_err(), ClmError::BadHandle);
        assert_eq!(handle.selection_object().unwrap_err(), ClmError::BadHandle);
        assert_eq!(dispatcher.active_dispatches(), 0);
    }

    #[test]
    fn test_readiness_is_lazy_and_released_before_finalize() {
        let (service, dispatcher) = setup();
        let handle =
            ClmHandle::initialize(&dispatcher, Callbacks::new(), Version::default()).unwrap();
        let id = handle.handle();

        handle.dispatch(DispatchPolicy::Available).unwrap();
        assert_eq!(service.events(), vec![ServiceEvent::Initialized(id)]);

        assert!(!handle.has_pending_callback().unwrap());
        let _ = handle.dispatch_blocking_timeout(Duration::ZERO);
        let object = handle.selection_object().unwrap();
        assert_eq!(object.0, i64::try_from(id.as_raw()).unwrap());

        handle.finalize().unwrap();
        assert_eq!(
            service.events(),
            vec![
                ServiceEvent::Initialized(id),
                ServiceEvent::ReadinessAcquired(id),
                ServiceEvent::ReadinessReleased(id),
                ServiceEvent::Finalized(id),
            ]
        );
    }

    #[test]
    fn test_finalize_failure_still_releases_and_terminates() {
        let (service, dispatcher) = setup();
        let handle =
            ClmHandle::initialize(&dispatcher, Callbacks::new(), Version::default()).unwrap();
        let id = handle.handle();
        handle.selection_object().unwrap();
        service.fail_next_finalize(id, ClmError::TryAgain).unwrap();

        assert_eq!(handle.finalize().unwrap_err(), ClmError::TryAgain);
        assert!(!handle.is_active());
        assert_eq!(
            service.events().last(),
            Some(&ServiceEvent::ReadinessReleased(id))
        );
        assert_eq!(handle.finalize().unwrap_err(), ClmError::BadHandle);
    }

    #[test]
    fn test_drop_finalizes() {
        let (service, dispatcher) = setup();
        let handle =
            ClmHandle::initialize(&dispatcher, Callbacks::new(), Version::default()).unwrap();
        let id = handle.handle();
        drop(handle);
        assert_eq!(service.session_count(), 0);
        assert_eq!(service.events().last(), Some(&ServiceEvent::Finalized(id)));
    }

    #[test]
    fn test_bounded_blocking_dispatch_times_out_quickly() {
        let (_service, dispatcher) = setup();
        let handle =
            ClmHandle::initialize(&dispatcher, Callbacks::new(), Version::default()).unwrap();

        let started = Instant::now();
        let err = handle.dispatch_blocking_timeout(Duration::ZERO).unwrap_err();
        assert_eq!(err, ClmError::Timeout);
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(!dispatcher.is_dispatching(thread::current().id()));
        assert!(handle.is_active());
    }

    #[test]
    fn test_has_pending_callback() {
        let (service, dispatcher) = setup();
        let handle =
            ClmHandle::initialize(&dispatcher, Callbacks::new(), Version::default()).unwrap();

        assert!(!handle.has_pending_callback().unwrap());
        service
            .push_cluster_node(handle.handle(), Invocation(1), None, AisStatus::Ok)
            .unwrap();
        assert!(handle.has_pending_callback().unwrap());
        assert!(
            handle
                .has_pending_callback_timeout(Duration::from_millis(5))
                .unwrap()
        );

        handle.dispatch(DispatchPolicy::Available).unwrap();
        assert!(!handle.has_pending_callback().unwrap());
    }

    #[test]
    fn test_same_handle_dispatched_from_callback_is_refused() {
        let (service, dispatcher) = setup();
        let slot: Arc<Mutex<Option<Arc<ClmHandle>>>> = Arc::new(Mutex::new(None));
        let outcome = Arc::new(Mutex::new(None));

        let this = Arc::clone(&slot);
        let record = Arc::clone(&outcome);
        let callbacks = Callbacks::new().on_track_cluster(move |_, _, _| {
            let handle = this.lock().clone();
            if let Some(handle) = handle {
                *record.lock() = Some((
                    handle.dispatch(DispatchPolicy::Available),
                    handle.finalize(),
                ));
            }
        });

        let handle =
            Arc::new(ClmHandle::initialize(&dispatcher, callbacks, Version::default()).unwrap());
        *slot.lock() = Some(Arc::clone(&handle));

        service
            .push_track_cluster(
                handle.handle(),
                ClusterNotificationBuffer::default(),
                0,
                AisStatus::Ok,
            )
            .unwrap();
        handle.dispatch(DispatchPolicy::Available).unwrap();

        let raw = handle.handle().as_raw();
        assert_eq!(
            outcome.lock().take(),
            Some((
                Err(ClmError::DispatchInProgress(raw)),
                Err(ClmError::DispatchInProgress(raw))
            ))
        );
        assert!(handle.is_active());

        // Break the callback -> handle cycle.
        slot.lock().take();
    }
}
