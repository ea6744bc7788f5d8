//! Session lifecycle and callback dispatch for cluster membership handles.
//!
//! Provides:
//! - `ClmHandle` - Initialize, dispatch and finalize a membership session
//! - `Dispatcher` - Routes service notifications to the dispatching session
//! - `DispatchRegistry` - Thread to session correlation
//! - `DispatchPump` - Background dispatch on a Tokio blocking worker
//! - Service implementations (memory)

pub mod dispatcher;
pub mod handle;
pub mod pump;
pub mod registry;
pub mod service;
pub mod session;

pub use dispatcher::Dispatcher;
pub use handle::ClmHandle;
pub use pump::DispatchPump;
pub use registry::{Binding, DispatchRegistry};
pub use session::{Callbacks, SessionState};

#[cfg(feature = "memory")]
pub use service::MemoryMembershipService;
