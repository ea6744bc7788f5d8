//! Core abstractions for cluster membership client handles.
//!
//! This crate provides the fundamental building blocks:
//! - `AisStatus` / `ClusterChange` - Numeric code tables
//! - `ClmError` - Flat error taxonomy
//! - Node, notification and version value types
//! - `MembershipService` and callback traits
//! - `ClmConfig` - Handle configuration

pub mod config;
pub mod error;
pub mod status;
pub mod traits;
pub mod types;

pub use config::{ClmConfig, ConfigError};
pub use error::ClmError;
pub use status::{AisStatus, ClusterChange, UnknownCode};
pub use traits::{
    GetClusterNodeCallback, MembershipService, NotificationSink, ReadinessSource,
    TrackClusterCallback,
};
pub use types::{
    AddressFamily, ClusterNode, ClusterNotification, ClusterNotificationBuffer, DispatchPolicy,
    Invocation, NodeAddress, SelectionObject, SessionHandle, Version,
};
