//! In-memory membership service.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use clm_core::{
    AisStatus, ClmError, ClusterNode, ClusterNotificationBuffer, DispatchPolicy, Invocation,
    MembershipService, NotificationSink, ReadinessSource, SelectionObject, SessionHandle, Version,
};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

/// Default cap on concurrently open sessions.
const MAX_SESSIONS: usize = 1024;

/// A queued notification, with its status still in raw form.
#[derive(Debug, Clone)]
pub enum Notification {
    ClusterNode {
        invocation: Invocation,
        node: Option<ClusterNode>,
        status: i32,
    },
    TrackCluster {
        buffer: ClusterNotificationBuffer,
        number_of_members: u32,
        status: i32,
    },
}

impl Notification {
    fn deliver(self, sink: &dyn NotificationSink) {
        match self {
            Self::ClusterNode {
                invocation,
                node,
                status,
            } => sink.deliver_cluster_node(invocation, node, status),
            Self::TrackCluster {
                buffer,
                number_of_members,
                status,
            } => sink.deliver_track_cluster(buffer, number_of_members, status),
        }
    }
}

/// Observable service-side lifecycle events, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEvent {
    Initialized(SessionHandle),
    ReadinessAcquired(SessionHandle),
    ReadinessReleased(SessionHandle),
    Finalized(SessionHandle),
}

type Journal = Arc<Mutex<Vec<ServiceEvent>>>;

#[derive(Default)]
struct QueueState {
    notifications: VecDeque<Notification>,
    closed: bool,
    fail_next_dispatch: Option<ClmError>,
    /// Taken by the next dispatch that reaches delivery: deliver this many,
    /// then fail.
    fail_after: Option<(usize, ClmError)>,
    fail_next_finalize: Option<ClmError>,
}

#[derive(Default)]
struct SessionQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

/// In-memory membership service.
///
/// Useful for development and tests. Notifications are queued per session
/// with [`push`](Self::push) and handed out by dispatch; faults can be
/// injected at each step of the session lifecycle.
pub struct MemoryMembershipService {
    supported: Version,
    max_sessions: usize,
    next_handle: AtomicU64,
    sessions: DashMap<SessionHandle, Arc<SessionQueue>>,
    fail_next_initialize: Mutex<Option<ClmError>>,
    journal: Journal,
}

impl MemoryMembershipService {
    /// Create a service supporting version `B.01.01`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            supported: Version::default(),
            max_sessions: MAX_SESSIONS,
            next_handle: AtomicU64::new(1),
            sessions: DashMap::new(),
            fail_next_initialize: Mutex::new(None),
            journal: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Advertise a different supported version.
    #[must_use]
    pub fn with_supported_version(mut self, version: Version) -> Self {
        self.supported = version;
        self
    }

    /// Cap the number of concurrently open sessions.
    #[must_use]
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    fn queue(&self, handle: SessionHandle) -> Result<Arc<SessionQueue>, ClmError> {
        self.sessions
            .get(&handle)
            .map(|q| Arc::clone(q.value()))
            .ok_or(ClmError::BadHandle)
    }

    fn record(&self, event: ServiceEvent) {
        self.journal.lock().push(event);
    }

    /// Queue a notification for `handle` and wake any waiter.
    ///
    /// # Errors
    /// Returns `BadHandle` if the session is not open.
    pub fn push(&self, handle: SessionHandle, notification: Notification) -> Result<(), ClmError> {
        let queue = self.queue(handle)?;
        queue.state.lock().notifications.push_back(notification);
        queue.ready.notify_all();
        Ok(())
    }

    /// Queue a node lookup result.
    ///
    /// # Errors
    /// Returns `BadHandle` if the session is not open.
    pub fn push_cluster_node(
        &self,
        handle: SessionHandle,
        invocation: Invocation,
        node: Option<ClusterNode>,
        status: AisStatus,
    ) -> Result<(), ClmError> {
        self.push(
            handle,
            Notification::ClusterNode {
                invocation,
                node,
                status: status.value(),
            },
        )
    }

    /// Queue a tracking update.
    ///
    /// # Errors
    /// Returns `BadHandle` if the session is not open.
    pub fn push_track_cluster(
        &self,
        handle: SessionHandle,
        buffer: ClusterNotificationBuffer,
        number_of_members: u32,
        status: AisStatus,
    ) -> Result<(), ClmError> {
        self.push(
            handle,
            Notification::TrackCluster {
                buffer,
                number_of_members,
                status: status.value(),
            },
        )
    }

    /// Number of notifications queued for `handle`.
    #[must_use]
    pub fn pending(&self, handle: SessionHandle) -> usize {
        self.queue(handle)
            .map(|q| q.state.lock().notifications.len())
            .unwrap_or(0)
    }

    /// Number of open sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of lifecycle events so far.
    #[must_use]
    pub fn events(&self) -> Vec<ServiceEvent> {
        self.journal.lock().clone()
    }

    /// Make the next initialize fail with `error`.
    pub fn fail_next_initialize(&self, error: ClmError) {
        *self.fail_next_initialize.lock() = Some(error);
    }

    /// Make the next dispatch on `handle` fail before delivering anything.
    ///
    /// # Errors
    /// Returns `BadHandle` if the session is not open.
    pub fn fail_next_dispatch(
        &self,
        handle: SessionHandle,
        error: ClmError,
    ) -> Result<(), ClmError> {
        self.queue(handle)?.state.lock().fail_next_dispatch = Some(error);
        Ok(())
    }

    /// Make the next dispatch on `handle` that reaches delivery fail with
    /// `error` after delivering `deliveries` notifications.
    ///
    /// The fault is discarded if that dispatch runs out of notifications
    /// first; it never carries over to a later call.
    ///
    /// # Errors
    /// Returns `BadHandle` if the session is not open.
    pub fn fail_dispatch_after(
        &self,
        handle: SessionHandle,
        deliveries: usize,
        error: ClmError,
    ) -> Result<(), ClmError> {
        self.queue(handle)?.state.lock().fail_after = Some((deliveries, error));
        Ok(())
    }

    /// Make the next finalize of `handle` fail with `error`.
    ///
    /// # Errors
    /// Returns `BadHandle` if the session is not open.
    pub fn fail_next_finalize(
        &self,
        handle: SessionHandle,
        error: ClmError,
    ) -> Result<(), ClmError> {
        self.queue(handle)?.state.lock().fail_next_finalize = Some(error);
        Ok(())
    }

    fn negotiate(&self, requested: Version) -> Result<Version, ClmError> {
        if !requested.is_well_formed() {
            return Err(ClmError::InvalidParam);
        }
        if requested.release_code != self.supported.release_code
            || requested.major_version > self.supported.major_version
        {
            return Err(ClmError::VersionMismatch {
                supported: Some(self.supported),
            });
        }
        Ok(Version::new(
            requested.release_code,
            requested.major_version,
            self.supported.minor_version,
        ))
    }
}

impl Default for MemoryMembershipService {
    fn default() -> Self {
        Self::new()
    }
}

impl MembershipService for MemoryMembershipService {
    fn initialize(&self, requested: Version) -> Result<(SessionHandle, Version), ClmError> {
        if let Some(error) = self.fail_next_initialize.lock().take() {
            return Err(error);
        }

        let negotiated = self.negotiate(requested)?;
        if self.sessions.len() >= self.max_sessions {
            return Err(ClmError::NoResources);
        }

        let handle = SessionHandle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.sessions.insert(handle, Arc::new(SessionQueue::default()));
        self.record(ServiceEvent::Initialized(handle));

        Ok((handle, negotiated))
    }

    fn finalize(&self, handle: SessionHandle) -> Result<(), ClmError> {
        let queue = self.queue(handle)?;
        if let Some(error) = queue.state.lock().fail_next_finalize.take() {
            return Err(error);
        }

        self.sessions.remove(&handle);
        queue.state.lock().closed = true;
        queue.ready.notify_all();
        self.record(ServiceEvent::Finalized(handle));
        Ok(())
    }

    fn dispatch(
        &self,
        handle: SessionHandle,
        policy: DispatchPolicy,
        sink: &dyn NotificationSink,
    ) -> Result<(), ClmError> {
        let queue = self.queue(handle)?;
        // A deadline past the end of time waits without bound.
        let deadline = match policy {
            DispatchPolicy::BlockingFor(timeout) => Instant::now().checked_add(timeout),
            _ => None,
        };

        let (budget, mut fail_after) = {
            let mut state = queue.state.lock();
            if let Some(error) = state.fail_next_dispatch.take() {
                return Err(error);
            }

            if policy.blocks() {
                while state.notifications.is_empty() {
                    if state.closed {
                        return Err(ClmError::BadHandle);
                    }
                    match deadline {
                        None => queue.ready.wait(&mut state),
                        Some(deadline) => {
                            if queue.ready.wait_until(&mut state, deadline).timed_out()
                                && state.notifications.is_empty()
                            {
                                return Err(ClmError::Timeout);
                            }
                        }
                    }
                }
            }

            let budget = match policy {
                DispatchPolicy::Available => state.notifications.len(),
                DispatchPolicy::One
                | DispatchPolicy::Blocking
                | DispatchPolicy::BlockingFor(_) => 1,
            };
            (budget, state.fail_after.take())
        };

        for _ in 0..budget {
            match fail_after.take() {
                Some((0, error)) => return Err(error),
                Some((remaining, error)) => fail_after = Some((remaining - 1, error)),
                None => {}
            }
            let next = queue.state.lock().notifications.pop_front();

            // Delivered with no lock held: callbacks may push or probe.
            match next {
                Some(notification) => notification.deliver(sink),
                None => break,
            }
        }

        Ok(())
    }

    fn readiness(&self, handle: SessionHandle) -> Result<Box<dyn ReadinessSource>, ClmError> {
        let queue = self.queue(handle)?;
        self.record(ServiceEvent::ReadinessAcquired(handle));
        Ok(Box::new(MemoryReadiness {
            handle,
            queue,
            released: AtomicBool::new(false),
            journal: Arc::clone(&self.journal),
        }))
    }
}

/// Readiness source backed by a session queue.
struct MemoryReadiness {
    handle: SessionHandle,
    queue: Arc<SessionQueue>,
    /// Only changed with the queue lock held, so a waiter cannot miss it.
    released: AtomicBool,
    journal: Journal,
}

impl ReadinessSource for MemoryReadiness {
    fn wait(&self, timeout: Option<Duration>) -> Result<bool, ClmError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.queue.state.lock();

        loop {
            if self.released.load(Ordering::Acquire) {
                return Err(ClmError::BadHandle);
            }
            if !state.notifications.is_empty() {
                return Ok(true);
            }
            if state.closed {
                return Err(ClmError::BadHandle);
            }
            match deadline {
                None => self.queue.ready.wait(&mut state),
                Some(deadline) => {
                    if self.queue.ready.wait_until(&mut state, deadline).timed_out() {
                        if self.released.load(Ordering::Acquire) {
                            return Err(ClmError::BadHandle);
                        }
                        return Ok(!state.notifications.is_empty());
                    }
                }
            }
        }
    }

    fn selection_object(&self) -> SelectionObject {
        SelectionObject(i64::try_from(self.handle.as_raw()).unwrap_or(i64::MAX))
    }

    fn close(&self) {
        let first = {
            let _state = self.queue.state.lock();
            !self.released.swap(true, Ordering::AcqRel)
        };
        if first {
            self.queue.ready.notify_all();
            self.journal
                .lock()
                .push(ServiceEvent::ReadinessReleased(self.handle));
        }
    }
}

impl Drop for MemoryReadiness {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        nodes: Mutex<Vec<(Invocation, i32)>>,
        tracks: Mutex<Vec<(u64, u32, i32)>>,
    }

    impl NotificationSink for Recorder {
        fn deliver_cluster_node(
            &self,
            invocation: Invocation,
            _node: Option<ClusterNode>,
            status: i32,
        ) {
            self.nodes.lock().push((invocation, status));
        }

        fn deliver_track_cluster(
            &self,
            buffer: ClusterNotificationBuffer,
            number_of_members: u32,
            status: i32,
        ) {
            self.tracks
                .lock()
                .push((buffer.view_number, number_of_members, status));
        }
    }

    fn open(service: &MemoryMembershipService) -> SessionHandle {
        service.initialize(Version::default()).unwrap().0
    }

    #[test]
    fn test_handles_are_distinct_and_non_zero() {
        let service = MemoryMembershipService::new();
        let a = open(&service);
        let b = open(&service);
        assert!(a.is_initialized());
        assert!(b.is_initialized());
        assert_ne!(a, b);
        assert_eq!(service.session_count(), 2);
    }

    #[test]
    fn test_version_negotiation() {
        let service = MemoryMembershipService::new();

        let (_, negotiated) = service.initialize(Version::new('B', 1, 0)).unwrap();
        assert_eq!(negotiated, Version::new('B', 1, 1));

        assert_eq!(
            service.initialize(Version::new('B', 2, 0)).unwrap_err(),
            ClmError::VersionMismatch {
                supported: Some(Version::new('B', 1, 1))
            }
        );
        assert!(matches!(
            service.initialize(Version::new('A', 1, 0)),
            Err(ClmError::VersionMismatch { .. })
        ));
        assert_eq!(
            service.initialize(Version::new('b', 1, 0)).unwrap_err(),
            ClmError::InvalidParam
        );
    }

    #[test]
    fn test_capacity() {
        let service = MemoryMembershipService::new().with_max_sessions(1);
        open(&service);
        assert_eq!(
            service.initialize(Version::default()).unwrap_err(),
            ClmError::NoResources
        );
    }

    #[test]
    fn test_injected_initialize_failure_is_one_shot() {
        let service = MemoryMembershipService::new();
        service.fail_next_initialize(ClmError::TryAgain);
        assert_eq!(
            service.initialize(Version::default()).unwrap_err(),
            ClmError::TryAgain
        );
        assert!(service.initialize(Version::default()).is_ok());
    }

    #[test]
    fn test_dispatch_policies() {
        let service = MemoryMembershipService::new();
        let handle = open(&service);
        for i in 0..3 {
            service
                .push_cluster_node(handle, Invocation(i), None, AisStatus::Ok)
                .unwrap();
        }

        let sink = Recorder::default();
        service.dispatch(handle, DispatchPolicy::One, &sink).unwrap();
        assert_eq!(sink.nodes.lock().len(), 1);

        service.dispatch(handle, DispatchPolicy::Available, &sink).unwrap();
        assert_eq!(
            *sink.nodes.lock(),
            vec![(Invocation(0), 1), (Invocation(1), 1), (Invocation(2), 1)]
        );
        assert_eq!(service.pending(handle), 0);
    }

    #[test]
    fn test_bounded_dispatch_times_out() {
        let service = MemoryMembershipService::new();
        let handle = open(&service);
        let sink = Recorder::default();

        let started = Instant::now();
        let err = service
            .dispatch(
                handle,
                DispatchPolicy::BlockingFor(Duration::from_millis(20)),
                &sink,
            )
            .unwrap_err();
        assert_eq!(err, ClmError::Timeout);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_blocking_dispatch_wakes_on_push() {
        let service = Arc::new(MemoryMembershipService::new());
        let handle = open(&service);

        let pusher = {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                service
                    .push_track_cluster(
                        handle,
                        ClusterNotificationBuffer::default(),
                        2,
                        AisStatus::Ok,
                    )
                    .unwrap();
            })
        };

        let sink = Recorder::default();
        service.dispatch(handle, DispatchPolicy::Blocking, &sink).unwrap();
        pusher.join().unwrap();
        assert_eq!(*sink.tracks.lock(), vec![(0, 2, 1)]);
    }

    #[test]
    fn test_fail_after_deliveries() {
        let service = MemoryMembershipService::new();
        let handle = open(&service);
        for i in 0..3 {
            service
                .push_cluster_node(handle, Invocation(i), None, AisStatus::Ok)
                .unwrap();
        }
        service
            .fail_dispatch_after(handle, 1, ClmError::Library)
            .unwrap();

        let sink = Recorder::default();
        let err = service
            .dispatch(handle, DispatchPolicy::Available, &sink)
            .unwrap_err();
        assert_eq!(err, ClmError::Library);
        assert_eq!(sink.nodes.lock().len(), 1);
        assert_eq!(service.pending(handle), 2);
    }

    #[test]
    fn test_fail_after_is_discarded_when_queue_runs_out() {
        let service = MemoryMembershipService::new();
        let handle = open(&service);
        service
            .push_cluster_node(handle, Invocation(0), None, AisStatus::Ok)
            .unwrap();
        service
            .fail_dispatch_after(handle, 3, ClmError::Library)
            .unwrap();

        let sink = Recorder::default();
        service.dispatch(handle, DispatchPolicy::Available, &sink).unwrap();
        assert_eq!(sink.nodes.lock().len(), 1);

        for i in 1..=5 {
            service
                .push_cluster_node(handle, Invocation(i), None, AisStatus::Ok)
                .unwrap();
        }
        service.dispatch(handle, DispatchPolicy::Available, &sink).unwrap();
        assert_eq!(sink.nodes.lock().len(), 6);
    }

    #[test]
    fn test_unrepresentable_deadline_waits_without_bound() {
        let service = Arc::new(MemoryMembershipService::new());
        let handle = open(&service);
        let readiness = service.readiness(handle).unwrap();

        let pusher = {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                service
                    .push_cluster_node(handle, Invocation(1), None, AisStatus::Ok)
                    .unwrap();
            })
        };
        assert!(readiness.wait(Some(Duration::MAX)).unwrap());
        pusher.join().unwrap();

        let sink = Recorder::default();
        service
            .dispatch(handle, DispatchPolicy::BlockingFor(Duration::MAX), &sink)
            .unwrap();
        assert_eq!(*sink.nodes.lock(), vec![(Invocation(1), 1)]);
    }

    #[test]
    fn test_close_wakes_waiters() {
        let service = MemoryMembershipService::new();
        let handle = open(&service);
        let readiness: Arc<dyn ReadinessSource> = Arc::from(service.readiness(handle).unwrap());

        let waiter = {
            let readiness = Arc::clone(&readiness);
            thread::spawn(move || {
                let started = Instant::now();
                (readiness.wait(Some(Duration::from_secs(5))), started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        readiness.close();
        readiness.close();

        let (result, waited) = waiter.join().unwrap();
        assert_eq!(result, Err(ClmError::BadHandle));
        assert!(waited < Duration::from_secs(1));
        assert_eq!(readiness.wait(Some(Duration::ZERO)), Err(ClmError::BadHandle));

        drop(readiness);
        let released = service
            .events()
            .into_iter()
            .filter(|e| *e == ServiceEvent::ReadinessReleased(handle))
            .count();
        assert_eq!(released, 1);
    }

    #[test]
    fn test_readiness_tracks_queue() {
        let service = MemoryMembershipService::new();
        let handle = open(&service);
        let readiness = service.readiness(handle).unwrap();

        assert!(!readiness.wait(Some(Duration::ZERO)).unwrap());
        service
            .push_cluster_node(handle, Invocation(1), None, AisStatus::Ok)
            .unwrap();
        assert!(readiness.wait(Some(Duration::ZERO)).unwrap());
        assert!(readiness.wait(None).unwrap());

        drop(readiness);
        service.finalize(handle).unwrap();
        assert_eq!(
            service.events(),
            vec![
                ServiceEvent::Initialized(handle),
                ServiceEvent::ReadinessAcquired(handle),
                ServiceEvent::ReadinessReleased(handle),
                ServiceEvent::Finalized(handle),
            ]
        );
    }

    #[test]
    fn test_finalize_unknown_handle() {
        let service = MemoryMembershipService::new();
        let handle = open(&service);
        service.finalize(handle).unwrap();
        assert_eq!(service.finalize(handle).unwrap_err(), ClmError::BadHandle);
        assert_eq!(
            service
                .push_cluster_node(handle, Invocation(1), None, AisStatus::Ok)
                .unwrap_err(),
            ClmError::BadHandle
        );
    }
}
