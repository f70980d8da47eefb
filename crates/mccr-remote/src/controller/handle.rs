//! Handle returned to the caller of a started operation

use chrono::{DateTime, Utc};
use mccr_core::{ControllerError, ControllerResult, OperationId, OperationInfo, OperationResult};
use tokio::sync::oneshot;

/// Handle to an accepted remote operation.
///
/// Dropping the handle does not affect the operation.
#[derive(Debug)]
pub struct OperationHandle {
    info: OperationInfo,
    done: oneshot::Receiver<OperationResult>,
}

impl OperationHandle {
    pub(crate) fn new(info: OperationInfo, done: oneshot::Receiver<OperationResult>) -> Self {
        Self { info, done }
    }

    pub fn id(&self) -> OperationId {
        self.info.id
    }

    pub fn info(&self) -> &OperationInfo {
        &self.info
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.info.started_at
    }

    /// Wait for the outcome.
    ///
    /// Resolves after every observer received `on_operation_finished` and the
    /// controller is idle again. Fails with `SessionClosed` if the operation
    /// task was dropped without completing (runtime shut down).
    pub async fn wait(self) -> ControllerResult<OperationResult> {
        self.done.await.map_err(|_| ControllerError::SessionClosed)
    }
}
