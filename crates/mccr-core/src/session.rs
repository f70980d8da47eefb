//! DeviceSession trait - the collaborator that talks to the card reader

use async_trait::async_trait;

use crate::error::DeviceResult;
use crate::models::OperationParams;

/// An open connection to a card reader.
///
/// This trait abstracts the underlying transport (USB HID, serial) and the
/// vendor protocol. The controller treats a remote operation as one opaque
/// asynchronous call that eventually succeeds or fails.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Stable identifier of the reader (serial number, device path)
    fn id(&self) -> &str;

    /// Whether the session can still accept commands
    fn is_open(&self) -> bool;

    /// Run one remote operation against the reader
    ///
    /// # Arguments
    /// * `params` - Caller-supplied operation input
    ///
    /// # Returns
    /// The payload reported by the reader or remote endpoint, or an error.
    /// An implementation that honours [`request_cancel`](Self::request_cancel)
    /// resolves with [`DeviceError::Cancelled`](crate::DeviceError::Cancelled).
    async fn perform_remote_operation(
        &self,
        params: OperationParams,
    ) -> DeviceResult<serde_json::Value>;

    /// Ask the in-flight operation to abort.
    ///
    /// Cooperative and non-blocking: the request may be acknowledged later,
    /// or never.
    fn request_cancel(&self);
}
