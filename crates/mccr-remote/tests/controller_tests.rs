//! Integration tests for the remote operation controller
//!
//! These tests drive a controller against the simulated reader and check the
//! single-flight, notification and failure guarantees seen by observers.

use std::sync::{mpsc, Arc, Barrier, Weak};
use std::time::Duration;

use mccr_remote::{
    ControllerConfig, ControllerError, DeviceSession, FailureKind, OperationHandle, OperationId,
    OperationInfo, OperationObserver, OperationParams, OperationResult, OperationState,
    RemoteOperationController, RemoteService, SimulatedOutcome, SimulatedSession,
    SubscriptionId,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio_test::{assert_err, assert_ok};

// =============================================================================
// Test Observers
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Started {
        id: OperationId,
        ongoing: bool,
    },
    Finished {
        id: OperationId,
        result: OperationResult,
        ongoing: bool,
    },
}

/// Records every notification together with the controller's
/// `is_operation_ongoing()` as seen from inside the callback
#[derive(Default)]
struct Recorder {
    controller: Mutex<Weak<RemoteOperationController>>,
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn attach(controller: &Arc<RemoteOperationController>) -> Arc<Self> {
        let recorder = Arc::new(Self::default());
        *recorder.controller.lock() = Arc::downgrade(controller);
        controller.subscribe(recorder.clone());
        recorder
    }

    fn ongoing(&self) -> bool {
        self.controller
            .lock()
            .upgrade()
            .map(|c| c.is_operation_ongoing())
            .unwrap_or(false)
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    fn finished_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, Event::Finished { .. }))
            .count()
    }
}

impl OperationObserver for Recorder {
    fn on_operation_started(&self, operation: &OperationInfo) {
        let ongoing = self.ongoing();
        self.events.lock().push(Event::Started {
            id: operation.id,
            ongoing,
        });
    }

    fn on_operation_finished(&self, operation: &OperationInfo, result: &OperationResult) {
        let ongoing = self.ongoing();
        self.events.lock().push(Event::Finished {
            id: operation.id,
            result: result.clone(),
            ongoing,
        });
    }
}

/// Unsubscribes itself from inside its first `on_operation_finished`
#[derive(Default)]
struct OneShot {
    controller: Mutex<Weak<RemoteOperationController>>,
    subscription: Mutex<Option<SubscriptionId>>,
    finished: Mutex<usize>,
}

impl OperationObserver for OneShot {
    fn on_operation_started(&self, _operation: &OperationInfo) {}

    fn on_operation_finished(&self, _operation: &OperationInfo, _result: &OperationResult) {
        *self.finished.lock() += 1;
        let id = self.subscription.lock().take();
        if let (Some(controller), Some(id)) = (self.controller.lock().upgrade(), id) {
            assert!(controller.unsubscribe(id));
        }
    }
}

/// Tries to start another operation from inside `on_operation_finished`
#[derive(Default)]
struct Restarter {
    controller: Mutex<Weak<RemoteOperationController>>,
    attempts: Mutex<Vec<ControllerError>>,
}

impl OperationObserver for Restarter {
    fn on_operation_started(&self, _operation: &OperationInfo) {}

    fn on_operation_finished(&self, _operation: &OperationInfo, _result: &OperationResult) {
        if let Some(controller) = self.controller.lock().upgrade() {
            if let Err(e) = controller.start_operation(OperationParams::default()) {
                self.attempts.lock().push(e);
            }
        }
    }
}

struct Faulty;

impl OperationObserver for Faulty {
    fn on_operation_started(&self, _operation: &OperationInfo) {
        panic!("faulty observer");
    }

    fn on_operation_finished(&self, _operation: &OperationInfo, _result: &OperationResult) {
        panic!("faulty observer");
    }
}

/// Appends its label to a shared log on every finish notification. The first
/// finish is reported on `entered` before the optional delay.
struct Logger {
    label: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
    delay: Duration,
    entered: Mutex<Option<mpsc::Sender<()>>>,
}

impl Logger {
    fn new(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Self {
        Self {
            label,
            log: log.clone(),
            delay: Duration::ZERO,
            entered: Mutex::new(None),
        }
    }
}

impl OperationObserver for Logger {
    fn on_operation_started(&self, _operation: &OperationInfo) {}

    fn on_operation_finished(&self, _operation: &OperationInfo, _result: &OperationResult) {
        if let Some(entered) = self.entered.lock().take() {
            let _ = entered.send(());
        }
        std::thread::sleep(self.delay);
        self.log.lock().push(self.label);
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn controller_for(
    session: Arc<SimulatedSession>,
    config: ControllerConfig,
) -> Arc<RemoteOperationController> {
    Arc::new(RemoteOperationController::new(session, config))
}

fn quick_config() -> ControllerConfig {
    ControllerConfig::for_service(RemoteService::KeyInjection)
        .with_operation_timeout(Duration::from_secs(5))
        .with_cancel_grace(Duration::from_millis(100))
}

async fn finish(handle: OperationHandle) -> OperationResult {
    tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("operation did not finish")
        .expect("operation dropped")
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_successful_operation_lifecycle() {
    let session = Arc::new(SimulatedSession::with_outcome(
        SimulatedOutcome::Success {
            payload: serde_json::json!({ "ksn": "FFFF9876543210E00001" }),
        },
        Duration::from_millis(50),
    ));
    let controller = controller_for(session.clone(), quick_config());
    let recorder = Recorder::attach(&controller);

    assert!(!controller.is_operation_ongoing());
    assert_eq!(controller.state(), OperationState::Idle);

    let params = OperationParams::new(serde_json::json!({ "slot": 1 }))
        .with_endpoint("https://rs.example.com/keys");
    let handle = controller.start_operation(params.clone()).unwrap();
    let id = handle.id();

    // Started is delivered synchronously, before start_operation returns
    assert_eq!(recorder.events(), vec![Event::Started { id, ongoing: true }]);
    assert!(controller.is_operation_ongoing());
    assert!(controller.state().is_running());

    let result = finish(handle).await;
    let expected = OperationResult::success(serde_json::json!({ "ksn": "FFFF9876543210E00001" }));
    assert_eq!(result, expected);

    assert_eq!(
        recorder.events(),
        vec![
            Event::Started { id, ongoing: true },
            Event::Finished {
                id,
                result: expected,
                ongoing: true
            },
        ]
    );
    assert!(!controller.is_operation_ongoing());
    assert_eq!(controller.state(), OperationState::Idle);
    assert_eq!(session.last_params(), Some(params));
}

#[tokio::test]
async fn test_second_start_rejected_while_running() {
    let session = Arc::new(SimulatedSession::with_outcome(
        SimulatedOutcome::default(),
        Duration::from_millis(50),
    ));
    let controller = controller_for(session.clone(), quick_config());
    let recorder = Recorder::attach(&controller);

    let handle = assert_ok!(controller.start_operation(OperationParams::default()));
    let rejected =
        assert_err!(controller.start_operation(OperationParams::new(serde_json::json!({ "p": 2 }))));
    assert_eq!(rejected, ControllerError::AlreadyRunning);

    let result = finish(handle).await;
    assert!(result.is_success());
    assert_eq!(session.call_count(), 1);
    assert_eq!(recorder.events().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_single_flight() {
    const CALLERS: usize = 16;

    let session = Arc::new(SimulatedSession::with_outcome(
        SimulatedOutcome::default(),
        Duration::from_millis(100),
    ));
    let controller = controller_for(session.clone(), quick_config());
    let recorder = Recorder::attach(&controller);
    let barrier = Arc::new(Barrier::new(CALLERS));

    let results: Vec<Result<OperationHandle, ControllerError>> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..CALLERS)
            .map(|_| {
                let controller = controller.clone();
                let barrier = barrier.clone();
                scope.spawn(move || {
                    barrier.wait();
                    controller.start_operation(OperationParams::default())
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let (accepted, rejected): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| r.is_ok());
    assert_eq!(accepted.len(), 1);
    assert_eq!(rejected.len(), CALLERS - 1);
    assert!(rejected
        .iter()
        .all(|r| matches!(r, Err(ControllerError::AlreadyRunning))));

    let handle = accepted.into_iter().next().unwrap().unwrap();
    assert!(finish(handle).await.is_success());
    assert_eq!(session.call_count(), 1);
    assert_eq!(recorder.finished_count(), 1);
}

#[tokio::test]
async fn test_cancel_when_idle_is_rejected() {
    let session = Arc::new(SimulatedSession::default());
    let controller = controller_for(session.clone(), quick_config());
    let recorder = Recorder::attach(&controller);

    assert_eq!(assert_err!(controller.cancel_operation()), ControllerError::NotRunning);
    assert!(recorder.events().is_empty());
    assert_eq!(session.cancel_request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_acknowledged_by_device() {
    let session = Arc::new(SimulatedSession::with_outcome(
        SimulatedOutcome::Hang,
        Duration::ZERO,
    ));
    let controller = controller_for(session.clone(), quick_config());
    let recorder = Recorder::attach(&controller);

    let handle = controller.start_operation(OperationParams::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    controller.cancel_operation().unwrap();
    // Repeated request while the first is pending is accepted, not re-sent
    controller.cancel_operation().unwrap();

    let result = finish(handle).await;
    assert_eq!(result.failure_kind(), Some(FailureKind::Cancelled));
    assert_eq!(recorder.finished_count(), 1);
    assert_eq!(session.cancel_request_count(), 1);
    assert!(!controller.is_operation_ongoing());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_right_after_start_does_not_wait_for_grace() {
    let session = Arc::new(SimulatedSession::with_outcome(
        SimulatedOutcome::Hang,
        Duration::ZERO,
    ));
    let config = quick_config().with_cancel_grace(Duration::from_secs(30));
    let controller = controller_for(session.clone(), config);
    let recorder = Recorder::attach(&controller);
    let started = tokio::time::Instant::now();

    let handle = controller.start_operation(OperationParams::default()).unwrap();
    // Let the operation task reach the device call before it is entered
    tokio::task::yield_now().await;
    controller.cancel_operation().unwrap();

    let result = finish(handle).await;
    assert_eq!(result.failure_kind(), Some(FailureKind::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(session.cancel_request_count() <= 1);
    assert_eq!(recorder.finished_count(), 1);
    assert_eq!(controller.state(), OperationState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_without_device_acknowledgement() {
    let session = Arc::new(SimulatedSession::with_outcome(
        SimulatedOutcome::Hang,
        Duration::ZERO,
    ));
    session.set_acknowledge_cancel(false);
    let controller = controller_for(session.clone(), quick_config());
    let recorder = Recorder::attach(&controller);

    let handle = controller.start_operation(OperationParams::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    controller.cancel_operation().unwrap();

    // Completes after the cancel grace period even though the device ignores it
    let result = finish(handle).await;
    assert_eq!(result.failure_kind(), Some(FailureKind::Cancelled));
    assert_eq!(recorder.finished_count(), 1);
    assert_eq!(controller.state(), OperationState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_completes_once_and_returns_to_idle() {
    let session = Arc::new(SimulatedSession::with_outcome(
        SimulatedOutcome::Hang,
        Duration::ZERO,
    ));
    session.set_acknowledge_cancel(false);
    let config = quick_config()
        .with_operation_timeout(Duration::from_millis(50))
        .with_cancel_grace(Duration::from_millis(20));
    let controller = controller_for(session.clone(), config);
    let recorder = Recorder::attach(&controller);

    let result = finish(controller.start_operation(OperationParams::default()).unwrap()).await;

    assert_eq!(result, OperationResult::timeout());
    assert_eq!(recorder.finished_count(), 1);
    assert_eq!(session.cancel_request_count(), 1);
    assert!(!controller.is_operation_ongoing());

    // Idle again: the next operation is accepted
    session.set_outcome(SimulatedOutcome::default());
    let next = finish(controller.start_operation(OperationParams::default()).unwrap()).await;
    assert!(next.is_success());
    assert_eq!(recorder.finished_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_acknowledged_within_grace() {
    let session = Arc::new(SimulatedSession::with_outcome(
        SimulatedOutcome::Hang,
        Duration::ZERO,
    ));
    let config = quick_config()
        .with_operation_timeout(Duration::from_millis(50))
        .with_cancel_grace(Duration::from_secs(30));
    let controller = controller_for(session.clone(), config);
    let recorder = Recorder::attach(&controller);
    let started = tokio::time::Instant::now();

    let result = finish(controller.start_operation(OperationParams::default()).unwrap()).await;

    // The device honours the cancel request, so the grace period is not used up
    assert_eq!(result, OperationResult::timeout());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(session.call_count(), 1);
    assert_eq!(session.cancel_request_count(), 1);
    assert_eq!(recorder.finished_count(), 1);
    assert_eq!(controller.state(), OperationState::Idle);
}

#[tokio::test]
async fn test_device_error_completes_once_and_returns_to_idle() {
    let session = Arc::new(SimulatedSession::with_outcome(
        SimulatedOutcome::DeviceError {
            code: 0x09,
            message: "Remote services host refused the session".to_string(),
        },
        Duration::from_millis(10),
    ));
    let controller = controller_for(session.clone(), quick_config());
    let recorder = Recorder::attach(&controller);

    let result = finish(controller.start_operation(OperationParams::default()).unwrap()).await;

    assert_eq!(
        result,
        OperationResult::failure(
            FailureKind::DeviceError,
            "Device error response: Remote services host refused the session (code 0x09)"
        )
    );
    assert_eq!(recorder.finished_count(), 1);
    assert_eq!(controller.state(), OperationState::Idle);
}

#[tokio::test]
async fn test_observer_unsubscribes_itself_during_finish() {
    let session = Arc::new(SimulatedSession::default());
    let controller = controller_for(session.clone(), quick_config());

    let one_shot = Arc::new(OneShot::default());
    *one_shot.controller.lock() = Arc::downgrade(&controller);
    let id = controller.subscribe(one_shot.clone());
    *one_shot.subscription.lock() = Some(id);
    let recorder = Recorder::attach(&controller);

    finish(controller.start_operation(OperationParams::default()).unwrap()).await;
    finish(controller.start_operation(OperationParams::default()).unwrap()).await;

    assert_eq!(*one_shot.finished.lock(), 1);
    assert_eq!(recorder.finished_count(), 2);
    assert_eq!(controller.observer_count(), 1);
    assert!(!controller.unsubscribe(id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unsubscribe_from_another_thread_waits_for_delivery() {
    let session = Arc::new(SimulatedSession::default());
    let controller = controller_for(session, quick_config());
    let log = Arc::new(Mutex::new(Vec::new()));
    let (entered_tx, entered_rx) = mpsc::channel();

    let slow = Logger {
        delay: Duration::from_millis(100),
        entered: Mutex::new(Some(entered_tx)),
        ..Logger::new("slow", &log)
    };
    controller.subscribe(Arc::new(slow));
    let tail = controller.subscribe(Arc::new(Logger::new("tail", &log)));

    let unsubscriber = std::thread::spawn({
        let controller = controller.clone();
        let log = log.clone();
        move || {
            entered_rx.recv().expect("finish delivery never started");
            assert!(controller.unsubscribe(tail));
            log.lock().push("unsubscribed");
        }
    });

    finish(controller.start_operation(OperationParams::default()).unwrap()).await;
    unsubscriber.join().unwrap();

    // The round in progress still reached the tail; nothing after unsubscribe did
    assert_eq!(*log.lock(), vec!["slow", "tail", "unsubscribed"]);

    finish(controller.start_operation(OperationParams::default()).unwrap()).await;
    assert_eq!(*log.lock(), vec!["slow", "tail", "unsubscribed", "slow"]);
    assert_eq!(controller.observer_count(), 1);
}

#[tokio::test]
async fn test_restart_from_finish_callback_is_rejected() {
    let session = Arc::new(SimulatedSession::default());
    let controller = controller_for(session.clone(), quick_config());

    let restarter = Arc::new(Restarter::default());
    *restarter.controller.lock() = Arc::downgrade(&controller);
    controller.subscribe(restarter.clone());

    finish(controller.start_operation(OperationParams::default()).unwrap()).await;

    assert_eq!(*restarter.attempts.lock(), vec![ControllerError::AlreadyRunning]);
    assert_eq!(session.call_count(), 1);
    assert!(!controller.is_operation_ongoing());
}

#[tokio::test]
async fn test_faulty_observer_does_not_block_delivery() {
    let session = Arc::new(SimulatedSession::default());
    let controller = controller_for(session, quick_config());
    controller.subscribe(Arc::new(Faulty));
    let recorder = Recorder::attach(&controller);

    let result = finish(controller.start_operation(OperationParams::default()).unwrap()).await;

    assert!(result.is_success());
    assert_eq!(recorder.events().len(), 2);
    assert_eq!(controller.state(), OperationState::Idle);
}

#[tokio::test]
async fn test_closed_session_rejects_start() {
    let session = Arc::new(SimulatedSession::default());
    let controller = controller_for(session.clone(), quick_config());
    let recorder = Recorder::attach(&controller);

    session.close();
    assert!(!session.is_open());
    assert!(controller.is_closed());
    assert_eq!(
        controller.start_operation(OperationParams::default()).unwrap_err(),
        ControllerError::SessionClosed
    );
    assert!(recorder.events().is_empty());
    assert!(!controller.is_operation_ongoing());
}

#[tokio::test]
async fn test_close_cancels_running_operation() {
    let session = Arc::new(SimulatedSession::with_outcome(
        SimulatedOutcome::Hang,
        Duration::ZERO,
    ));
    let controller = controller_for(session.clone(), quick_config());
    let recorder = Recorder::attach(&controller);

    let handle = controller.start_operation(OperationParams::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    controller.close();
    controller.close();

    let result = finish(handle).await;
    assert_eq!(result.failure_kind(), Some(FailureKind::Cancelled));
    assert_eq!(recorder.finished_count(), 1);
    assert_eq!(
        controller.start_operation(OperationParams::default()).unwrap_err(),
        ControllerError::SessionClosed
    );
}

#[tokio::test]
async fn test_session_closed_mid_operation_reports_failure() {
    let session = Arc::new(SimulatedSession::with_outcome(
        SimulatedOutcome::default(),
        Duration::ZERO,
    ));
    let controller = controller_for(session.clone(), quick_config());

    // Session closes between the start check and the device call
    struct CloseOnStart(Arc<SimulatedSession>);
    impl OperationObserver for CloseOnStart {
        fn on_operation_started(&self, _operation: &OperationInfo) {
            self.0.close();
        }
        fn on_operation_finished(&self, _o: &OperationInfo, _r: &OperationResult) {}
    }
    controller.subscribe(Arc::new(CloseOnStart(session.clone())));

    let result = finish(controller.start_operation(OperationParams::default()).unwrap()).await;
    assert_eq!(result.failure_kind(), Some(FailureKind::SessionClosed));
    assert!(!controller.is_operation_ongoing());
}

#[tokio::test]
async fn test_started_always_precedes_finished() {
    let session = Arc::new(SimulatedSession::default());
    let controller = controller_for(session, quick_config());
    let recorder = Recorder::attach(&controller);

    for _ in 0..5 {
        finish(controller.start_operation(OperationParams::default()).unwrap()).await;
    }

    let events = recorder.events();
    assert_eq!(events.len(), 10);
    for pair in events.chunks(2) {
        match pair {
            [Event::Started { id: a, .. }, Event::Finished { id: b, .. }] => assert_eq!(a, b),
            other => panic!("Unexpected event order: {:?}", other),
        }
    }
}

#[test]
fn test_start_on_shut_down_runtime_returns_to_idle() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let runtime_handle = runtime.handle().clone();
    drop(runtime);

    let session = Arc::new(SimulatedSession::default());
    let controller = Arc::new(RemoteOperationController::with_runtime(
        session.clone(),
        quick_config(),
        runtime_handle,
    ));
    let recorder = Recorder::attach(&controller);

    let handle = controller.start_operation(OperationParams::default()).unwrap();
    let result = tokio_test::block_on(finish(handle));

    assert_eq!(result.failure_kind(), Some(FailureKind::SessionClosed));
    assert_eq!(recorder.finished_count(), 1);
    assert_eq!(session.call_count(), 0);
    assert!(!controller.is_operation_ongoing());
    assert_eq!(controller.state(), OperationState::Idle);

    // Not stuck in Running: the next start is accepted and settles the same way
    let next = controller.start_operation(OperationParams::default()).unwrap();
    let result = tokio_test::block_on(finish(next));
    assert_eq!(result.failure_kind(), Some(FailureKind::SessionClosed));
    assert_eq!(recorder.finished_count(), 2);
}
