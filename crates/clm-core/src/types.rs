//! Value types exchanged with the membership service.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::status::ClusterChange;

/// Opaque session identifier issued by the membership service.
///
/// Zero means "not initialized" and is never handed out by a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(u64);

impl SessionHandle {
    /// The "not initialized" sentinel.
    pub const UNINITIALIZED: Self = Self(0);

    /// Wrap a raw identifier.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Whether this is a real, issued identifier.
    #[must_use]
    pub const fn is_initialized(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Identifier correlating a node lookup request with its callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Invocation(pub u64);

/// Raw wait-able object (file descriptor on Unix) behind a readiness source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectionObject(pub i64);

/// Service version, written `B.01.01`.
///
/// When requesting, `minor_version` is ignored by the service; the negotiated
/// version reports what it actually supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub release_code: char,
    pub major_version: u8,
    pub minor_version: u8,
}

impl Version {
    /// Create a version.
    #[must_use]
    pub const fn new(release_code: char, major_version: u8, minor_version: u8) -> Self {
        Self {
            release_code,
            major_version,
            minor_version,
        }
    }

    /// Release codes are single upper-case ASCII letters and majors start at 1.
    #[must_use]
    pub const fn is_well_formed(&self) -> bool {
        self.release_code.is_ascii_uppercase() && self.major_version > 0
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new('B', 1, 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02}.{:02}",
            self.release_code, self.major_version, self.minor_version
        )
    }
}

/// Address family of a node address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressFamily {
    Inet,
    Inet6,
}

/// Network address of a cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub family: AddressFamily,
    pub value: String,
}

/// Descriptor of one cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub node_id: u32,
    pub node_address: NodeAddress,
    pub node_name: String,
    /// Name of the hosting execution environment, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_environment: Option<String>,
    pub member: bool,
    /// Boot time in nanoseconds since the epoch.
    pub boot_timestamp: i64,
    /// View number in which the node joined.
    pub initial_view_number: u64,
}

/// One entry of a tracking notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNotification {
    pub cluster_node: ClusterNode,
    pub cluster_change: ClusterChange,
}

/// Tracking payload: the changed (or complete) membership at a view.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterNotificationBuffer {
    pub view_number: u64,
    pub notifications: Vec<ClusterNotification>,
}

impl ClusterNotificationBuffer {
    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    /// Whether the buffer has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

/// How a dispatch call drains pending notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// Deliver at most one pending notification, never block.
    One,
    /// Deliver every pending notification, never block.
    Available,
    /// Block until at least one notification is delivered.
    Blocking,
    /// Like `Blocking`, but fail with a timeout once the duration elapses.
    BlockingFor(Duration),
}

impl DispatchPolicy {
    /// Whether the policy may suspend the calling thread.
    #[must_use]
    pub const fn blocks(self) -> bool {
        matches!(self, Self::Blocking | Self::BlockingFor(_))
    }
}
