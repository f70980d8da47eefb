//! Observer capability for operation lifecycle notifications

use crate::models::{OperationInfo, OperationResult};

/// Receives start/finish notifications from a controller.
///
/// Callbacks run synchronously on the thread that drove the transition and
/// must not block for long. Calling back into the controller from a callback
/// is allowed.
pub trait OperationObserver: Send + Sync {
    /// Called once the controller entered the running state.
    fn on_operation_started(&self, operation: &OperationInfo);

    /// Called with the outcome, before the controller returns to idle.
    fn on_operation_finished(&self, operation: &OperationInfo, result: &OperationResult);
}
