//! Collaborator and callback traits.

use std::time::Duration;

use crate::{
    error::ClmError,
    status::AisStatus,
    types::{
        ClusterNode, ClusterNotificationBuffer, DispatchPolicy, Invocation, SelectionObject,
        SessionHandle, Version,
    },
};

/// Receiver of decoded notifications during a dispatch call.
///
/// A [`MembershipService`] calls these synchronously, on the thread that is
/// inside [`MembershipService::dispatch`], and never after it has returned.
/// Status codes are passed raw; the sink resolves them.
pub trait NotificationSink {
    /// Deliver the result of a node lookup.
    fn deliver_cluster_node(&self, invocation: Invocation, node: Option<ClusterNode>, status: i32);

    /// Deliver a membership tracking update.
    fn deliver_track_cluster(
        &self,
        buffer: ClusterNotificationBuffer,
        number_of_members: u32,
        status: i32,
    );
}

/// Wait-able object signaled while a session has pending notifications.
///
/// Shared between the threads waiting on it. Released by [`close`], or by
/// dropping the last reference.
///
/// [`close`]: ReadinessSource::close
pub trait ReadinessSource: Send + Sync {
    /// Wait until notifications are pending.
    ///
    /// `None` waits without bound; `Some(Duration::ZERO)` polls. Returns
    /// whether notifications are pending.
    ///
    /// # Errors
    /// Returns error if the underlying object is no longer valid.
    fn wait(&self, timeout: Option<Duration>) -> Result<bool, ClmError>;

    /// The raw object for registration in an external poll set.
    fn selection_object(&self) -> SelectionObject;

    /// Release the object. Waiters in [`wait`](Self::wait) wake up and fail,
    /// as does every later wait. Calling it again has no effect.
    fn close(&self);
}

/// The membership service a handle delegates to.
///
/// Production code binds this to the real service transport; tests bind it to
/// an in-memory implementation.
pub trait MembershipService: Send + Sync {
    /// Open a session, returning its identifier and the negotiated version.
    ///
    /// # Errors
    /// `VersionMismatch`, `InvalidParam`, `TryAgain`, `NoMemory`,
    /// `NoResources`, `Timeout` or `Library`.
    fn initialize(&self, requested: Version) -> Result<(SessionHandle, Version), ClmError>;

    /// Close a session.
    ///
    /// # Errors
    /// `BadHandle` for an unknown identifier, or a transport failure.
    fn finalize(&self, handle: SessionHandle) -> Result<(), ClmError>;

    /// Deliver pending notifications for `handle` to `sink`, per `policy`.
    ///
    /// # Errors
    /// `Timeout` when a bounded blocking policy expires without a delivery,
    /// `BadHandle`, or any transport failure.
    fn dispatch(
        &self,
        handle: SessionHandle,
        policy: DispatchPolicy,
        sink: &dyn NotificationSink,
    ) -> Result<(), ClmError>;

    /// Obtain the readiness source for `handle`.
    ///
    /// # Errors
    /// `BadHandle`, `NoMemory`, `NoResources` or a transport failure.
    fn readiness(&self, handle: SessionHandle) -> Result<Box<dyn ReadinessSource>, ClmError>;
}

/// Client callback for node lookup results.
pub trait GetClusterNodeCallback: Send + Sync {
    fn get_cluster_node(
        &self,
        invocation: Invocation,
        node: Option<&ClusterNode>,
        status: AisStatus,
    );
}

impl<F> GetClusterNodeCallback for F
where
    F: Fn(Invocation, Option<&ClusterNode>, AisStatus) + Send + Sync,
{
    fn get_cluster_node(
        &self,
        invocation: Invocation,
        node: Option<&ClusterNode>,
        status: AisStatus,
    ) {
        self(invocation, node, status);
    }
}

/// Client callback for membership tracking updates.
pub trait TrackClusterCallback: Send + Sync {
    fn track_cluster(
        &self,
        buffer: &ClusterNotificationBuffer,
        number_of_members: u32,
        status: AisStatus,
    );
}

impl<F> TrackClusterCallback for F
where
    F: Fn(&ClusterNotificationBuffer, u32, AisStatus) + Send + Sync,
{
    fn track_cluster(
        &self,
        buffer: &ClusterNotificationBuffer,
        number_of_members: u32,
        status: AisStatus,
    ) {
        self(buffer, number_of_members, status);
    }
}
