//! Observer registry
//!
//! Keeps the subscribed [`OperationObserver`]s in insertion order and
//! delivers notifications to them one round at a time.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mccr_core::{OperationInfo, OperationObserver, OperationResult};
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, error};

/// Handle returned by [`ObserverRegistry::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscription {
    id: SubscriptionId,
    observer: Arc<dyn OperationObserver>,
}

/// Set of observers notified on controller transitions.
///
/// A notification round holds the re-entrant delivery gate for its whole
/// duration. `unsubscribe` takes the same gate, so once it returns the
/// removed observer is never called again. Callbacks may unsubscribe
/// themselves (or others) from the delivering thread.
pub struct ObserverRegistry {
    subscriptions: Mutex<Vec<Subscription>>,
    delivery: ReentrantMutex<()>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
            delivery: ReentrantMutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add an observer; it is notified after all earlier subscribers
    pub fn subscribe(&self, observer: Arc<dyn OperationObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .lock()
            .push(Subscription { id, observer });
        debug!(subscription = %id, "Observer subscribed");
        id
    }

    /// Remove an observer. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let _gate = self.delivery.lock();
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        let removed = subscriptions.len() != before;
        if removed {
            debug!(subscription = %id, "Observer unsubscribed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.lock().is_empty()
    }

    pub fn notify_started(&self, operation: &OperationInfo) {
        self.deliver("operation_started", |observer| {
            observer.on_operation_started(operation)
        });
    }

    pub fn notify_finished(&self, operation: &OperationInfo, result: &OperationResult) {
        self.deliver("operation_finished", |observer| {
            observer.on_operation_finished(operation, result)
        });
    }

    fn deliver<F>(&self, event: &'static str, notify: F)
    where
        F: Fn(&dyn OperationObserver),
    {
        let _gate = self.delivery.lock();

        let targets: Vec<(SubscriptionId, Arc<dyn OperationObserver>)> = self
            .subscriptions
            .lock()
            .iter()
            .map(|s| (s.id, s.observer.clone()))
            .collect();

        for (id, observer) in targets {
            // An earlier callback in this round may have removed it
            if !self.is_subscribed(id) {
                continue;
            }

            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| notify(observer.as_ref()))) {
                error!(
                    subscription = %id,
                    event,
                    panic = %panic_message(panic.as_ref()),
                    "Observer panicked during notification"
                );
            }
        }
    }

    fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.subscriptions.lock().iter().any(|s| s.id == id)
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
