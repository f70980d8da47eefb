//! Remote services page model
//!
//! Headless counterpart of the "Remote services" page: it owns no widgets,
//! only the state a view binds to. The action button is enabled while no
//! operation is in flight, and the status line reflects the last outcome.

use std::sync::Arc;

use mccr_core::{
    ControllerResult, FailureKind, OperationId, OperationInfo, OperationObserver,
    OperationParams, OperationResult, RemoteService,
};
use parking_lot::RwLock;
use serde::Serialize;

use crate::controller::{OperationHandle, RemoteOperationController};
use crate::observer::SubscriptionId;

/// Status line shown under the action button
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageStatus {
    Ready,
    InProgress {
        operation_id: OperationId,
    },
    Succeeded {
        message: String,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

struct PageView {
    service: RemoteService,
    status: RwLock<PageStatus>,
}

impl OperationObserver for PageView {
    fn on_operation_started(&self, operation: &OperationInfo) {
        *self.status.write() = PageStatus::InProgress {
            operation_id: operation.id,
        };
    }

    fn on_operation_finished(&self, _operation: &OperationInfo, result: &OperationResult) {
        let status = match result {
            OperationResult::Success { payload } => PageStatus::Succeeded {
                message: payload
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{} completed", self.service.label())),
            },
            OperationResult::Failure { kind, message } => PageStatus::Failed {
                kind: *kind,
                message: format!("{} failed: {}", self.service.label(), message),
            },
        };
        *self.status.write() = status;
    }
}

/// Page model bound to one controller
pub struct RemoteServicesPage {
    controller: Arc<RemoteOperationController>,
    view: Arc<PageView>,
    subscription: SubscriptionId,
}

impl RemoteServicesPage {
    pub fn new(controller: Arc<RemoteOperationController>) -> Self {
        let view = Arc::new(PageView {
            service: controller.service(),
            status: RwLock::new(PageStatus::Ready),
        });
        let subscription = controller.subscribe(view.clone());
        Self {
            controller,
            view,
            subscription,
        }
    }

    pub fn title(&self) -> &'static str {
        self.view.service.label()
    }

    pub fn operation_ongoing(&self) -> bool {
        self.controller.is_operation_ongoing()
    }

    /// Whether the action button accepts clicks
    pub fn trigger_enabled(&self) -> bool {
        !self.controller.is_operation_ongoing() && !self.controller.is_closed()
    }

    pub fn status(&self) -> PageStatus {
        self.view.status.read().clone()
    }

    /// Button action. A rejected start leaves the status untouched.
    pub fn activate(&self, params: OperationParams) -> ControllerResult<OperationHandle> {
        self.controller.start_operation(params)
    }

    pub fn cancel(&self) -> ControllerResult<()> {
        self.controller.cancel_operation()
    }

    pub fn controller(&self) -> &Arc<RemoteOperationController> {
        &self.controller
    }
}

impl Drop for RemoteServicesPage {
    fn drop(&mut self) {
        self.controller.unsubscribe(self.subscription);
    }
}
