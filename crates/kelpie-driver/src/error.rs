//! Error types for fabric operations.

use crate::topology::PciAddress;
use thiserror::Error;

/// Result type alias for fabric operations.
pub type Result<T> = std::result::Result<T, FabricError>;

/// Errors that can occur during fabric operations.
///
/// `NotPresent` and `Ignore` are statuses rather than faults: discovery
/// reports absent functions as `NotPresent`, and firmware declining an SMP
/// function reports `Ignore`. Callers skip both; only `Failed` and friends
/// abort an operation.
#[derive(Debug, Error)]
pub enum FabricError {
    /// No function responded at this config-space address.
    #[error("no function present at {address}")]
    NotPresent {
        /// Address that was probed.
        address: PciAddress,
    },

    /// The function exists but is not a supported switch.
    #[error("unsupported device at {address}: {reason}")]
    Unsupported {
        /// Address of the rejected function.
        address: PciAddress,
        /// Why it was rejected.
        reason: String,
    },

    /// Operation understood but declined by firmware/hardware — skip, not fatal.
    #[error("operation declined: {reason}")]
    Ignore {
        /// What was declined.
        reason: String,
    },

    /// Genuine fault: bad config-space read, wedged bridge with no matching
    /// window, malformed SMP response.
    #[error("operation failed: {reason}")]
    Failed {
        /// Reason for failure.
        reason: String,
    },

    /// A mapping or allocation could not be satisfied.
    #[error("out of memory mapping {size:#x} bytes")]
    NoMemory {
        /// Requested size in bytes.
        size: u64,
    },

    /// Caller-supplied argument out of range.
    #[error("invalid parameter: {what}")]
    InvalidParameter {
        /// Which parameter and why.
        what: String,
    },

    /// Bridge fallback: the chip-space address is in no known BAR0 window.
    #[error("chip address {address:#010x} has no BAR0 aperture")]
    Bar0AddressNotMapped {
        /// The unreachable chip-space address.
        address: u32,
    },

    /// I/O error from the platform seam.
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl FabricError {
    /// Create a `Failed` error.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Create an `Ignore` status.
    pub fn ignore(reason: impl Into<String>) -> Self {
        Self::Ignore {
            reason: reason.into(),
        }
    }

    /// Create an `Unsupported` error.
    pub fn unsupported(address: PciAddress, reason: impl Into<String>) -> Self {
        Self::Unsupported {
            address,
            reason: reason.into(),
        }
    }

    /// Create an `InvalidParameter` error.
    pub fn invalid_parameter(what: impl Into<String>) -> Self {
        Self::InvalidParameter { what: what.into() }
    }

    /// Whether discovery may skip past this error instead of aborting a
    /// multi-device scan.
    #[must_use]
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            Self::NotPresent { .. } | Self::Unsupported { .. } | Self::Ignore { .. }
        )
    }
}
