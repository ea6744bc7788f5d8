//! Numeric status and cluster change tables.
//!
//! Every variant carries the tag the membership service uses on the wire.
//! Lookups scan the table for an exact tag match and never fall back to a
//! default: a code outside the table means the collaborator is broken.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ClmError;

/// A raw code that has no entry in the lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Unknown {kind} code: {code}")]
pub struct UnknownCode {
    /// Which table was searched.
    pub kind: &'static str,
    /// The offending raw value.
    pub code: i32,
}

/// Outcome code reported by the membership service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AisStatus {
    Ok,
    LibraryError,
    VersionMismatch,
    Timeout,
    TryAgain,
    InvalidParam,
    NoMemory,
    BadHandle,
    NotExist,
    Exist,
    NoSpace,
    Interrupt,
    NoResources,
    NotSupported,
    BadOperation,
    FailedOperation,
    MessageError,
    QueueFull,
    QueueNotAvailable,
    BadFlags,
    TooBig,
    NoSections,
}

impl AisStatus {
    /// All statuses in table order.
    pub const ALL: [Self; 22] = [
        Self::Ok,
        Self::LibraryError,
        Self::VersionMismatch,
        Self::Timeout,
        Self::TryAgain,
        Self::InvalidParam,
        Self::NoMemory,
        Self::BadHandle,
        Self::NotExist,
        Self::Exist,
        Self::NoSpace,
        Self::Interrupt,
        Self::NoResources,
        Self::NotSupported,
        Self::BadOperation,
        Self::FailedOperation,
        Self::MessageError,
        Self::QueueFull,
        Self::QueueNotAvailable,
        Self::BadFlags,
        Self::TooBig,
        Self::NoSections,
    ];

    /// The numeric tag of this status.
    #[must_use]
    pub const fn value(self) -> i32 {
        match self {
            Self::Ok => 1,
            Self::LibraryError => 2,
            Self::VersionMismatch => 3,
            Self::Timeout => 5,
            Self::TryAgain => 6,
            Self::InvalidParam => 7,
            Self::NoMemory => 8,
            Self::BadHandle => 9,
            Self::NotExist => 12,
            Self::Exist => 14,
            Self::NoSpace => 15,
            Self::Interrupt => 16,
            Self::NoResources => 18,
            Self::NotSupported => 19,
            Self::BadOperation => 20,
            Self::FailedOperation => 21,
            Self::MessageError => 22,
            Self::QueueFull => 23,
            Self::QueueNotAvailable => 24,
            Self::BadFlags => 25,
            Self::TooBig => 26,
            Self::NoSections => 27,
        }
    }

    /// Resolve a raw code reported by the collaborator.
    ///
    /// # Panics
    /// Panics if `code` is not in the table. The collaborator only ever
    /// reports codes it defines, so an unknown one is a defect on its side.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match Self::try_from(code) {
            Ok(status) => status,
            Err(e) => panic!("membership service contract violated: {e}"),
        }
    }

    /// Whether this is the success status.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Convert into a result, mapping every non-`Ok` status to its error.
    ///
    /// # Errors
    /// Returns the [`ClmError`] matching this status unless it is `Ok`.
    pub fn into_result(self) -> Result<(), ClmError> {
        match self {
            Self::Ok => Ok(()),
            other => Err(ClmError::from_failed(other)),
        }
    }
}

impl TryFrom<i32> for AisStatus {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.value() == code)
            .ok_or(UnknownCode {
                kind: "status",
                code,
            })
    }
}

/// Kind of membership change carried by a cluster notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterChange {
    /// Node was and still is a member.
    NoChange,
    /// Node joined the cluster.
    Joined,
    /// Node left the cluster.
    Left,
    /// Node attributes changed while it stayed a member.
    Reconfigured,
}

impl ClusterChange {
    /// All changes in table order.
    pub const ALL: [Self; 4] = [Self::NoChange, Self::Joined, Self::Left, Self::Reconfigured];

    /// The numeric tag of this change.
    #[must_use]
    pub const fn value(self) -> i32 {
        match self {
            Self::NoChange => 1,
            Self::Joined => 2,
            Self::Left => 3,
            Self::Reconfigured => 4,
        }
    }

    /// Resolve a raw change code reported by the collaborator.
    ///
    /// # Panics
    /// Panics if `value` is not in the table.
    #[must_use]
    pub fn from_value(value: i32) -> Self {
        match Self::try_from(value) {
            Ok(change) => change,
            Err(e) => panic!("membership service contract violated: {e}"),
        }
    }
}

impl TryFrom<i32> for ClusterChange {
    type Error = UnknownCode;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.value() == value)
            .ok_or(UnknownCode {
                kind: "cluster change",
                code: value,
            })
    }
}
