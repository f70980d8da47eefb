//! Remote operation models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RemoteService;
use crate::error::DeviceError;

/// Unique identifier of one started operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Caller-supplied input for a remote operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationParams {
    /// Remote services endpoint the reader is directed at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Command-specific request body (key slot, firmware image id, ...)
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl OperationParams {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            endpoint: None,
            payload,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// Why an operation did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The device call did not resolve within the configured deadline
    Timeout,
    /// Cancelled by the caller or acknowledged as cancelled by the device
    Cancelled,
    /// Transport or device failure passed through from the session
    DeviceError,
    /// The session was closed underneath the operation
    SessionClosed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::DeviceError => "device_error",
            FailureKind::SessionClosed => "session_closed",
        };
        f.write_str(s)
    }
}

/// Outcome of one remote operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationResult {
    Success {
        payload: serde_json::Value,
    },
    Failure {
        kind: FailureKind,
        message: String,
    },
}

impl OperationResult {
    pub fn success(payload: serde_json::Value) -> Self {
        OperationResult::Success { payload }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        OperationResult::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::failure(FailureKind::Timeout, "Operation timed out")
    }

    pub fn cancelled() -> Self {
        Self::failure(FailureKind::Cancelled, "Operation cancelled")
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OperationResult::Success { .. })
    }

    /// Failure kind, `None` on success
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            OperationResult::Success { .. } => None,
            OperationResult::Failure { kind, .. } => Some(*kind),
        }
    }
}

impl From<Result<serde_json::Value, DeviceError>> for OperationResult {
    fn from(result: Result<serde_json::Value, DeviceError>) -> Self {
        match result {
            Ok(payload) => OperationResult::Success { payload },
            Err(err) => OperationResult::Failure {
                kind: err.failure_kind(),
                message: err.to_string(),
            },
        }
    }
}

/// Read-only snapshot of a started operation, handed to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    pub id: OperationId,
    pub service: RemoteService,
    pub started_at: DateTime<Utc>,
}

/// Controller state.
///
/// ```text
/// Idle ──start──▶ Running ──device resolves──▶ Completed ──observers notified──▶ Idle
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OperationState {
    #[default]
    Idle,
    Running {
        started_at: DateTime<Utc>,
    },
    /// Result is being delivered; folds back to `Idle` right after
    Completed {
        result: OperationResult,
        finished_at: DateTime<Utc>,
    },
}

impl OperationState {
    pub fn is_idle(&self) -> bool {
        matches!(self, OperationState::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, OperationState::Running { .. })
    }
}
