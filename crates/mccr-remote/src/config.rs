//! Remote services configuration
//!
//! This module contains configuration types for the controller and for the
//! simulated reader used by tests and the runner binary.

use std::path::Path;
use std::time::Duration;

use mccr_core::RemoteService;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration file layout
///
/// ```toml
/// [controller]
/// service = "firmware_update"
/// operation_timeout_ms = 120000
/// cancel_grace_ms = 2000
///
/// [simulator]
/// latency_ms = 1500
/// outcome = { type = "success", payload = { slot = 2 } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteServicesConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl RemoteServicesConfig {
    /// Parse a configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.simulator.id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "simulator.id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Controller Configuration
// =============================================================================

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Operation category managed by this controller
    #[serde(default)]
    pub service: RemoteService,
    /// Deadline for one device call in milliseconds (0 disables the deadline)
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// How long to wait for the device to acknowledge a cancel request
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_operation_timeout_ms() -> u64 {
    120_000
}

fn default_cancel_grace_ms() -> u64 {
    2000
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            service: RemoteService::default(),
            operation_timeout_ms: default_operation_timeout_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

impl ControllerConfig {
    pub fn for_service(service: RemoteService) -> Self {
        Self {
            service,
            ..Default::default()
        }
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Deadline for one device call, `None` when disabled
    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.operation_timeout_ms > 0).then(|| Duration::from_millis(self.operation_timeout_ms))
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

// =============================================================================
// Simulated Reader Configuration
// =============================================================================

/// Simulated reader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Reader identifier reported by the session
    #[serde(default = "default_simulator_id")]
    pub id: String,
    /// Simulated operation duration in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
    /// What the simulated operation resolves with
    #[serde(default)]
    pub outcome: SimulatedOutcome,
    /// Whether a cancel request aborts the simulated operation
    #[serde(default = "default_acknowledge_cancel")]
    pub acknowledge_cancel: bool,
}

fn default_simulator_id() -> String {
    "sim-reader-0".to_string()
}

fn default_acknowledge_cancel() -> bool {
    true
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            id: default_simulator_id(),
            latency_ms: 0,
            outcome: SimulatedOutcome::default(),
            acknowledge_cancel: default_acknowledge_cancel(),
        }
    }
}

/// Scripted result of a simulated operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimulatedOutcome {
    /// Resolve successfully with this payload
    Success {
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Resolve with a device error response
    DeviceError { code: u8, message: String },
    /// Never resolve on its own
    Hang,
}

impl Default for SimulatedOutcome {
    fn default() -> Self {
        Self::Success {
            payload: serde_json::json!({ "message": "Remote operation completed" }),
        }
    }
}
