//! Per-session state shared between a handle and the dispatch registry.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use clm_core::{
    AisStatus, ClmError, ClusterNode, ClusterNotificationBuffer, GetClusterNodeCallback, Invocation,
    MembershipService, ReadinessSource, SelectionObject, SessionHandle, TrackClusterCallback,
    Version,
};
use parking_lot::Mutex;

/// Callbacks registered on initialize. Either may be absent.
#[derive(Clone, Default)]
pub struct Callbacks {
    get_cluster_node: Option<Arc<dyn GetClusterNodeCallback>>,
    track_cluster: Option<Arc<dyn TrackClusterCallback>>,
}

impl Callbacks {
    /// No callbacks registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node lookup closure.
    #[must_use]
    pub fn on_get_cluster_node<F>(self, f: F) -> Self
    where
        F: Fn(Invocation, Option<&ClusterNode>, AisStatus) + Send + Sync + 'static,
    {
        self.with_get_cluster_node(Arc::new(f))
    }

    /// Register a tracking closure.
    #[must_use]
    pub fn on_track_cluster<F>(self, f: F) -> Self
    where
        F: Fn(&ClusterNotificationBuffer, u32, AisStatus) + Send + Sync + 'static,
    {
        self.with_track_cluster(Arc::new(f))
    }

    /// Register a node lookup callback object.
    #[must_use]
    pub fn with_get_cluster_node(mut self, callback: Arc<dyn GetClusterNodeCallback>) -> Self {
        self.get_cluster_node = Some(callback);
        self
    }

    /// Register a tracking callback object.
    #[must_use]
    pub fn with_track_cluster(mut self, callback: Arc<dyn TrackClusterCallback>) -> Self {
        self.track_cluster = Some(callback);
        self
    }

    #[must_use]
    pub fn get_cluster_node(&self) -> Option<&Arc<dyn GetClusterNodeCallback>> {
        self.get_cluster_node.as_ref()
    }

    #[must_use]
    pub fn track_cluster(&self) -> Option<&Arc<dyn TrackClusterCallback>> {
        self.track_cluster.as_ref()
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("get_cluster_node", &self.get_cluster_node.is_some())
            .field("track_cluster", &self.track_cluster.is_some())
            .finish()
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Uninitialized = 0,
    Active = 1,
    /// Active, with a dispatch call in progress.
    Dispatching = 2,
    Finalized = 3,
}

impl SessionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Active,
            2 => Self::Dispatching,
            3 => Self::Finalized,
            _ => Self::Uninitialized,
        }
    }
}

/// One initialization of the membership service.
pub(crate) struct Session {
    handle: SessionHandle,
    version: Version,
    callbacks: Callbacks,
    state: AtomicU8,
    readiness: Mutex<Option<Arc<dyn ReadinessSource>>>,
}

impl Session {
    /// A session the service has issued `handle` for.
    pub(crate) fn active(handle: SessionHandle, version: Version, callbacks: Callbacks) -> Self {
        debug_assert!(handle.is_initialized());
        Self::with_state(handle, version, callbacks, SessionState::Active)
    }

    fn with_state(
        handle: SessionHandle,
        version: Version,
        callbacks: Callbacks,
        state: SessionState,
    ) -> Self {
        Self {
            handle,
            version,
            callbacks,
            state: AtomicU8::new(state as u8),
            readiness: Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub(crate) fn uninitialized(callbacks: Callbacks) -> Self {
        Self::with_state(
            SessionHandle::UNINITIALIZED,
            Version::default(),
            callbacks,
            SessionState::Uninitialized,
        )
    }

    pub(crate) const fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub(crate) const fn version(&self) -> Version {
        self.version
    }

    pub(crate) const fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    pub(crate) fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: SessionState, to: SessionState) -> Result<(), ClmError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| match SessionState::from_u8(actual) {
                SessionState::Dispatching => ClmError::DispatchInProgress(self.handle.as_raw()),
                _ => ClmError::BadHandle,
            })
    }

    /// Mark the session as dispatching until the guard drops.
    pub(crate) fn begin_dispatch(&self) -> Result<DispatchGuard<'_>, ClmError> {
        self.transition(SessionState::Active, SessionState::Dispatching)?;
        Ok(DispatchGuard { session: self })
    }

    /// Move to the terminal state. Fails while a dispatch is in progress.
    pub(crate) fn begin_finalize(&self) -> Result<(), ClmError> {
        self.transition(SessionState::Active, SessionState::Finalized)
    }

    fn ensure_usable(&self) -> Result<(), ClmError> {
        match self.state() {
            SessionState::Active | SessionState::Dispatching => Ok(()),
            SessionState::Uninitialized | SessionState::Finalized => Err(ClmError::BadHandle),
        }
    }

    /// The readiness source, created on first use.
    ///
    /// The slot is only locked while the source is looked up or created;
    /// callers wait on their own reference.
    fn readiness(
        &self,
        service: &dyn MembershipService,
    ) -> Result<Arc<dyn ReadinessSource>, ClmError> {
        let mut slot = self.readiness.lock();
        self.ensure_usable()?;
        if let Some(source) = slot.as_ref() {
            return Ok(Arc::clone(source));
        }

        tracing::debug!(handle = %self.handle, "Acquiring readiness source");
        let source: Arc<dyn ReadinessSource> = Arc::from(service.readiness(self.handle)?);
        *slot = Some(Arc::clone(&source));
        Ok(source)
    }

    /// Create the readiness source if it does not exist yet.
    pub(crate) fn ensure_readiness(&self, service: &dyn MembershipService) -> Result<(), ClmError> {
        self.readiness(service).map(|_| ())
    }

    pub(crate) fn selection_object(
        &self,
        service: &dyn MembershipService,
    ) -> Result<SelectionObject, ClmError> {
        Ok(self.readiness(service)?.selection_object())
    }

    /// Wait on the readiness source.
    ///
    /// Fails with `BadHandle` if the source is released during the wait.
    pub(crate) fn wait_pending(
        &self,
        service: &dyn MembershipService,
        timeout: Duration,
    ) -> Result<bool, ClmError> {
        self.readiness(service)?.wait(Some(timeout))
    }

    /// Close and drop the readiness source, if one was acquired.
    ///
    /// Waiters still holding a reference are woken and fail; the source is
    /// closed by the time this returns.
    pub(crate) fn release_readiness(&self) {
        let source = self.readiness.lock().take();
        if let Some(source) = source {
            source.close();
            tracing::debug!(handle = %self.handle, "Released readiness source");
        }
    }
}

/// Restores `Active` when a dispatch call ends, on every exit path.
pub(crate) struct DispatchGuard<'a> {
    session: &'a Session,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        let _ = self.session.transition(SessionState::Dispatching, SessionState::Active);
    }
}
