//! Simulated card reader session for testing

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mccr_core::{DeviceError, DeviceResult, DeviceSession, OperationParams};
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::config::{SimulatedOutcome, SimulatorConfig};

/// Simulated reader with a scripted outcome
pub struct SimulatedSession {
    id: String,
    config: RwLock<SimulatorConfig>,
    open: AtomicBool,
    /// Bumped on every cancel request; running calls watch for a change
    cancel_generation: watch::Sender<u64>,
    calls: AtomicUsize,
    cancel_requests: AtomicUsize,
    last_params: RwLock<Option<OperationParams>>,
}

impl SimulatedSession {
    pub fn new(config: &SimulatorConfig) -> Self {
        let (cancel_generation, _) = watch::channel(0);
        Self {
            id: config.id.clone(),
            config: RwLock::new(config.clone()),
            open: AtomicBool::new(true),
            cancel_generation,
            calls: AtomicUsize::new(0),
            cancel_requests: AtomicUsize::new(0),
            last_params: RwLock::new(None),
        }
    }

    /// Session that resolves with `outcome` after `latency`
    pub fn with_outcome(outcome: SimulatedOutcome, latency: Duration) -> Self {
        Self::new(&SimulatorConfig {
            latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            outcome,
            ..Default::default()
        })
    }

    /// Replace the outcome used by subsequent calls
    pub fn set_outcome(&self, outcome: SimulatedOutcome) {
        self.config.write().outcome = outcome;
    }

    /// Set simulated latency for subsequent calls
    pub fn set_latency(&self, latency: Duration) {
        self.config.write().latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
    }

    /// Choose whether cancel requests abort a running call
    pub fn set_acknowledge_cancel(&self, acknowledge: bool) {
        self.config.write().acknowledge_cancel = acknowledge;
    }

    /// Simulate the reader being unplugged
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn cancel_request_count(&self) -> usize {
        self.cancel_requests.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Option<OperationParams> {
        self.last_params.read().clone()
    }

    async fn run(config: &SimulatorConfig) -> DeviceResult<serde_json::Value> {
        if config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.latency_ms)).await;
        }

        match &config.outcome {
            SimulatedOutcome::Success { payload } => Ok(payload.clone()),
            SimulatedOutcome::DeviceError { code, message } => Err(DeviceError::Device {
                code: *code,
                message: message.clone(),
            }),
            SimulatedOutcome::Hang => std::future::pending().await,
        }
    }
}

impl Default for SimulatedSession {
    fn default() -> Self {
        Self::new(&SimulatorConfig::default())
    }
}

#[async_trait]
impl DeviceSession for SimulatedSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn perform_remote_operation(
        &self,
        params: OperationParams,
    ) -> DeviceResult<serde_json::Value> {
        if !self.is_open() {
            return Err(DeviceError::Closed);
        }

        self.calls.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(payload = %params.payload, "Simulated reader: operation requested");
        *self.last_params.write() = Some(params);

        // Only cancel requests issued after this point count
        let mut cancelled = self.cancel_generation.subscribe();
        let config = self.config.read().clone();

        if !config.acknowledge_cancel {
            return Self::run(&config).await;
        }

        tokio::select! {
            result = Self::run(&config) => result,
            _ = cancelled.changed() => {
                tracing::debug!("Simulated reader: cancellation acknowledged");
                Err(DeviceError::Cancelled)
            }
        }
    }

    fn request_cancel(&self) {
        self.cancel_requests.fetch_add(1, Ordering::SeqCst);
        self.cancel_generation.send_modify(|generation| *generation += 1);
    }
}
