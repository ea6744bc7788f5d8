//! Error type shared by the handle and the collaborator boundary.

use thiserror::Error;

use crate::{status::AisStatus, types::Version};

/// Failure of a membership handle operation.
///
/// Collaborator failures are passed through unchanged; the two
/// dispatch variants are raised locally when a handle is used in a way the
/// dispatch protocol forbids.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClmError {
    /// Unrecoverable library failure; the handle must be discarded.
    #[error("Library error")]
    Library,
    /// The call did not complete in time; its outcome is unknown.
    #[error("Operation timed out")]
    Timeout,
    /// Transient shortage, the call may be retried.
    #[error("Service unavailable, try again")]
    TryAgain,
    #[error("Invalid parameter")]
    InvalidParam,
    /// No compatible version; carries the version the service supports, when
    /// it reported one.
    #[error(
        "Version mismatch{}",
        .supported.map_or_else(String::new, |v| format!(", service supports {v}"))
    )]
    VersionMismatch { supported: Option<Version> },
    #[error("Out of memory")]
    NoMemory,
    #[error("Out of resources")]
    NoResources,
    /// Handle is not initialized or has been finalized.
    #[error("Bad handle")]
    BadHandle,
    /// The session is already being dispatched, or finalize raced a dispatch.
    #[error("Dispatch already in progress on handle {0}")]
    DispatchInProgress(u64),
    /// The calling thread is already inside dispatch for another session.
    #[error("Thread is already dispatching handle {0}")]
    ReentrantDispatch(u64),
    /// Any other failure status reported by the service.
    #[error("Service reported {0:?}")]
    Other(AisStatus),
}

impl ClmError {
    /// Build the error for a non-`Ok` status.
    ///
    /// A bare status does not say which version the service supports, so
    /// version mismatches built this way carry none.
    #[must_use]
    pub fn from_failed(status: AisStatus) -> Self {
        debug_assert!(!status.is_ok(), "Ok is not a failure");
        match status {
            AisStatus::LibraryError => Self::Library,
            AisStatus::Timeout => Self::Timeout,
            AisStatus::TryAgain => Self::TryAgain,
            AisStatus::InvalidParam => Self::InvalidParam,
            AisStatus::VersionMismatch => Self::VersionMismatch { supported: None },
            AisStatus::NoMemory => Self::NoMemory,
            AisStatus::NoResources => Self::NoResources,
            AisStatus::BadHandle => Self::BadHandle,
            other => Self::Other(other),
        }
    }

    /// The status this failure corresponds to.
    #[must_use]
    pub const fn status(&self) -> AisStatus {
        match self {
            Self::Library => AisStatus::LibraryError,
            Self::Timeout => AisStatus::Timeout,
            Self::TryAgain => AisStatus::TryAgain,
            Self::InvalidParam => AisStatus::InvalidParam,
            Self::VersionMismatch { .. } => AisStatus::VersionMismatch,
            Self::NoMemory => AisStatus::NoMemory,
            Self::NoResources => AisStatus::NoResources,
            Self::BadHandle => AisStatus::BadHandle,
            Self::DispatchInProgress(_) | Self::ReentrantDispatch(_) => AisStatus::BadOperation,
            Self::Other(status) => *status,
        }
    }

    /// Whether retrying the whole operation later can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TryAgain | Self::Timeout | Self::NoMemory | Self::NoResources
        )
    }
}
