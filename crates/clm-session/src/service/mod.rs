//! Membership service implementations.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{MemoryMembershipService, Notification, ServiceEvent};
