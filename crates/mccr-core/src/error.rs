//! Common error types for remote operations

use thiserror::Error;

use crate::models::FailureKind;

/// Result type for controller calls
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Result type for device session calls
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors rejected synchronously at the controller call boundary.
///
/// None of these ever reach the running state: a rejected call leaves the
/// controller exactly as it found it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    /// An operation is already in flight (or still delivering its result)
    #[error("Remote operation already running")]
    AlreadyRunning,

    /// Cancellation requested while no operation is in flight
    #[error("No remote operation running")]
    NotRunning,

    /// The backing device session is no longer usable
    #[error("Device session closed")]
    SessionClosed,
}

/// Errors reported by a [`DeviceSession`](crate::DeviceSession)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The transport acknowledged a cancellation request
    #[error("Operation cancelled by device session")]
    Cancelled,

    /// The session was closed while the operation was running
    #[error("Device session closed")]
    Closed,

    /// Transport/communication error (USB, serial)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The reader or the remote endpoint rejected the request
    #[error("Device error response: {message} (code 0x{code:02X})")]
    Device {
        /// Vendor result code
        code: u8,
        /// Human-readable error message
        message: String,
    },
}

impl DeviceError {
    /// Returns the failure kind this error is reported as
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            DeviceError::Cancelled => FailureKind::Cancelled,
            DeviceError::Closed => FailureKind::SessionClosed,
            DeviceError::Transport(_) | DeviceError::Device { .. } => FailureKind::DeviceError,
        }
    }
}
