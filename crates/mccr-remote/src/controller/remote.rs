//! Single-flight remote operation controller

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mccr_core::{
    ControllerError, ControllerResult, DeviceResult, DeviceSession, FailureKind, OperationId,
    OperationInfo, OperationObserver, OperationParams, OperationResult, OperationState,
    RemoteService,
};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use super::OperationHandle;
use crate::config::ControllerConfig;
use crate::observer::{ObserverRegistry, SubscriptionId};

/// The operation currently owned by the controller
struct ActiveOperation {
    info: OperationInfo,
    cancel_tx: watch::Sender<bool>,
    cancel_requested: bool,
    done_tx: Option<oneshot::Sender<OperationResult>>,
}

struct ControllerState {
    current: OperationState,
    active: Option<ActiveOperation>,
}

struct Inner {
    session: Arc<dyn DeviceSession>,
    config: ControllerConfig,
    runtime: Handle,
    /// Guards the state machine; every transition happens under this lock
    state: Mutex<ControllerState>,
    /// Mirror of `!state.current.is_idle()`, written under the state lock
    ongoing: AtomicBool,
    closed: AtomicBool,
    observers: ObserverRegistry,
}

/// Drives remote operations against one device session, one at a time.
///
/// # Lifecycle
///
/// ```text
/// Idle ──start_operation()──▶ Running ──device call resolves──▶ Completed ──▶ Idle
///                               │          (or timeout / cancel)     │
///                               └─ on_operation_started              └─ on_operation_finished
/// ```
///
/// `start_operation` is rejected with `AlreadyRunning` until the controller
/// is back in `Idle`, including while the result is being delivered.
pub struct RemoteOperationController {
    inner: Arc<Inner>,
}

impl RemoteOperationController {
    /// Create a controller that runs device calls on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(session: Arc<dyn DeviceSession>, config: ControllerConfig) -> Self {
        Self::with_runtime(session, config, Handle::current())
    }

    /// Create a controller bound to an explicit runtime handle, for callers
    /// (UI threads) that live outside the runtime
    pub fn with_runtime(
        session: Arc<dyn DeviceSession>,
        config: ControllerConfig,
        runtime: Handle,
    ) -> Self {
        debug!(
            session = %session.id(),
            service = %config.service,
            timeout_ms = config.operation_timeout_ms,
            "Remote operation controller created"
        );
        Self {
            inner: Arc::new(Inner {
                session,
                config,
                runtime,
                state: Mutex::new(ControllerState {
                    current: OperationState::Idle,
                    active: None,
                }),
                ongoing: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                observers: ObserverRegistry::new(),
            }),
        }
    }

    pub fn service(&self) -> RemoteService {
        self.inner.config.service
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn session_id(&self) -> &str {
        self.inner.session.id()
    }

    /// Whether an operation is in flight. Never blocks.
    pub fn is_operation_ongoing(&self) -> bool {
        self.inner.ongoing.load(Ordering::SeqCst)
    }

    /// Snapshot of the current state
    pub fn state(&self) -> OperationState {
        self.inner.state.lock().current.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst) || !self.inner.session.is_open()
    }

    pub fn subscribe(&self, observer: Arc<dyn OperationObserver>) -> SubscriptionId {
        self.inner.observers.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.observers.unsubscribe(id)
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }

    /// Start a remote operation.
    ///
    /// Returns as soon as the operation is running and `on_operation_started`
    /// was delivered; the device call continues on the runtime.
    pub fn start_operation(&self, params: OperationParams) -> ControllerResult<OperationHandle> {
        let inner = &self.inner;

        let (info, cancel_rx, done_rx) = {
            let mut state = inner.state.lock();

            if inner.closed.load(Ordering::SeqCst) || !inner.session.is_open() {
                warn!(session = %inner.session.id(), "Rejected remote operation: session closed");
                return Err(ControllerError::SessionClosed);
            }

            if !state.current.is_idle() {
                debug!(session = %inner.session.id(), "Rejected remote operation: already running");
                return Err(ControllerError::AlreadyRunning);
            }

            let info = OperationInfo {
                id: OperationId::new(),
                service: inner.config.service,
                started_at: Utc::now(),
            };
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let (done_tx, done_rx) = oneshot::channel();

            state.current = OperationState::Running {
                started_at: info.started_at,
            };
            state.active = Some(ActiveOperation {
                info: info.clone(),
                cancel_tx,
                cancel_requested: false,
                done_tx: Some(done_tx),
            });
            inner.ongoing.store(true, Ordering::SeqCst);

            (info, cancel_rx, done_rx)
        };

        info!(
            operation_id = %info.id,
            service = %info.service,
            session = %inner.session.id(),
            "Remote operation started"
        );

        // Delivered before the device call exists, so it always precedes
        // on_operation_finished for this operation
        inner.observers.notify_started(&info);

        // The guard travels inside the task, so a task dropped unpolled
        // (runtime shut down) still completes the operation
        let guard = CompletionGuard::new(inner.clone(), info.clone());
        inner.runtime.spawn(async move {
            let result = guard
                .inner
                .run_operation(&guard.info, params, cancel_rx)
                .await;
            guard.finish(result);
        });

        Ok(OperationHandle::new(info, done_rx))
    }

    /// Request cancellation of the running operation.
    ///
    /// Returns once the request is signalled; the device session sees it
    /// as soon as its call is in flight. Observers receive
    /// `Failure{Cancelled}` when the device acknowledges it or the cancel
    /// grace period runs out.
    pub fn cancel_operation(&self) -> ControllerResult<()> {
        let operation_id = {
            let mut state = self.inner.state.lock();
            if !state.current.is_running() {
                return Err(ControllerError::NotRunning);
            }
            let active = state.active.as_mut().ok_or(ControllerError::NotRunning)?;

            if active.cancel_requested {
                debug!(operation_id = %active.info.id, "Cancellation already requested");
                return Ok(());
            }

            active.cancel_requested = true;
            let _ = active.cancel_tx.send(true);
            active.info.id
        };

        info!(operation_id = %operation_id, "Remote operation cancellation requested");
        Ok(())
    }

    /// Close the controller: further starts fail with `SessionClosed` and a
    /// running operation is cancelled. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(session = %self.inner.session.id(), "Remote operation controller closed");
        match self.cancel_operation() {
            Ok(()) | Err(ControllerError::NotRunning) => {}
            Err(e) => warn!(error = %e, "Failed to cancel operation on close"),
        }
    }
}

impl Drop for RemoteOperationController {
    fn drop(&mut self) {
        self.close();
    }
}

/// Completes its operation when the task owning it is dropped before
/// reaching [`CompletionGuard::finish`]
struct CompletionGuard {
    inner: Arc<Inner>,
    info: OperationInfo,
    armed: bool,
}

impl CompletionGuard {
    fn new(inner: Arc<Inner>, info: OperationInfo) -> Self {
        Self {
            inner,
            info,
            armed: true,
        }
    }

    fn finish(mut self, result: OperationResult) {
        self.armed = false;
        self.inner.complete(&self.info, result);
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(
            operation_id = %self.info.id,
            "Operation task dropped before completion, runtime shut down"
        );
        self.inner.complete(
            &self.info,
            OperationResult::failure(
                FailureKind::SessionClosed,
                "Runtime shut down before the operation finished",
            ),
        );
    }
}

impl Inner {
    async fn run_operation(
        &self,
        info: &OperationInfo,
        params: OperationParams,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> OperationResult {
        // Cancelled between the start notification and this task running
        if *cancel_rx.borrow_and_update() {
            return OperationResult::cancelled();
        }

        let grace = self.config.cancel_grace();
        let (device_cancel_tx, device_cancel_rx) = watch::channel(false);
        let mut call: JoinHandle<DeviceResult<serde_json::Value>> = self.runtime.spawn(
            call_with_cancellation(self.session.clone(), params, device_cancel_rx),
        );

        let deadline = self.config.operation_timeout();
        let timed_out = async {
            match deadline {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            _ = cancellation_requested(&mut cancel_rx) => {
                let _ = device_cancel_tx.send(true);
                self.settle_cancelled(info, &mut call, grace).await;
                OperationResult::cancelled()
            }
            joined = &mut call => call_result(info, joined),
            _ = timed_out => {
                warn!(
                    operation_id = %info.id,
                    timeout_ms = self.config.operation_timeout_ms,
                    "Remote operation timed out"
                );
                let _ = device_cancel_tx.send(true);
                if tokio::time::timeout(grace, &mut call).await.is_err() {
                    warn!(operation_id = %info.id, "Device call abandoned after timeout");
                    call.abort();
                }
                OperationResult::timeout()
            }
        }
    }

    /// Wait up to `grace` for the device to acknowledge a cancel request
    async fn settle_cancelled(
        &self,
        info: &OperationInfo,
        call: &mut JoinHandle<DeviceResult<serde_json::Value>>,
        grace: Duration,
    ) {
        match tokio::time::timeout(grace, &mut *call).await {
            Ok(Ok(Err(e))) if e.failure_kind() == FailureKind::Cancelled => {
                debug!(operation_id = %info.id, "Device acknowledged cancellation");
            }
            Ok(Ok(Ok(_))) => {
                warn!(
                    operation_id = %info.id,
                    "Device completed after cancellation was requested, reporting cancelled"
                );
            }
            Ok(Ok(Err(e))) => {
                debug!(operation_id = %info.id, error = %e, "Device call failed during cancellation");
            }
            Ok(Err(e)) => {
                warn!(operation_id = %info.id, error = %e, "Device call task failed during cancellation");
            }
            Err(_) => {
                warn!(
                    operation_id = %info.id,
                    grace_ms = self.config.cancel_grace_ms,
                    "Device did not acknowledge cancellation, abandoning call"
                );
                call.abort();
            }
        }
    }

    /// Deliver the outcome and fold back to idle
    fn complete(&self, info: &OperationInfo, result: OperationResult) {
        let done_tx = {
            let mut state = self.state.lock();
            let active = match state.active.as_mut() {
                Some(active) if active.info.id == info.id => active,
                _ => {
                    warn!(operation_id = %info.id, "Ignoring completion of unknown operation");
                    return;
                }
            };
            let done_tx = active.done_tx.take();

            state.current = OperationState::Completed {
                result: result.clone(),
                finished_at: Utc::now(),
            };
            done_tx
        };

        match &result {
            OperationResult::Success { .. } => {
                info!(operation_id = %info.id, service = %info.service, "Remote operation succeeded");
            }
            OperationResult::Failure { kind, message } => {
                warn!(
                    operation_id = %info.id,
                    service = %info.service,
                    kind = %kind,
                    message = %message,
                    "Remote operation failed"
                );
            }
        }

        self.observers.notify_finished(info, &result);

        {
            let mut state = self.state.lock();
            state.current = OperationState::Idle;
            state.active = None;
            self.ongoing.store(false, Ordering::SeqCst);
        }
        debug!(operation_id = %info.id, "Controller idle");

        if let Some(tx) = done_tx {
            let _ = tx.send(result);
        }
    }
}

async fn cancellation_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: nothing left to cancel
            std::future::pending::<()>().await;
        }
    }
}

/// Runs the device call and forwards a cancel request to the session once
/// the call has been entered, so the session never sees it too early
async fn call_with_cancellation(
    session: Arc<dyn DeviceSession>,
    params: OperationParams,
    mut cancel_rx: watch::Receiver<bool>,
) -> DeviceResult<serde_json::Value> {
    let mut call = session.perform_remote_operation(params);
    let mut forwarded = false;

    loop {
        tokio::select! {
            biased;

            result = &mut call => return result,
            _ = cancellation_requested(&mut cancel_rx), if !forwarded => {
                forwarded = true;
                session.request_cancel();
            }
        }
    }
}

fn call_result(
    info: &OperationInfo,
    joined: Result<DeviceResult<serde_json::Value>, JoinError>,
) -> OperationResult {
    match joined {
        Ok(result) => result.into(),
        Err(e) if e.is_panic() => {
            warn!(operation_id = %info.id, "Device session panicked during operation");
            OperationResult::failure(FailureKind::DeviceError, "Device session panicked")
        }
        Err(_) => OperationResult::cancelled(),
    }
}
