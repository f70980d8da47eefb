//! mccr-remote - Remote services controller for card reader sessions
//!
//! This crate drives long-running remote operations (key injection, firmware
//! and configuration pushes) against an attached card reader, with at most
//! one operation in flight per device session.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  RemoteServicesPage                          │
//! │  (button state, status message)                              │
//! │                          │                                   │
//! │  ┌───────────────────────┴───────────────────────────────┐  │
//! │  │           RemoteOperationController                    │  │
//! │  │  ┌────────────────┐        ┌─────────────────────┐    │  │
//! │  │  │ OperationState │        │  ObserverRegistry   │    │  │
//! │  │  │ (single-flight)│        │  (started/finished) │    │  │
//! │  │  └────────────────┘        └─────────────────────┘    │  │
//! │  └───────────────────────┬───────────────────────────────┘  │
//! │                          │                                   │
//! │                 ┌────────┴────────┐                          │
//! │                 │  DeviceSession  │                          │
//! │                 │ (USB/simulated) │                          │
//! │                 └─────────────────┘                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod observer;
pub mod page;
pub mod session;

pub use config::{ControllerConfig, RemoteServicesConfig, SimulatedOutcome, SimulatorConfig};
pub use controller::{OperationHandle, RemoteOperationController};
pub use error::ConfigError;
pub use observer::{ObserverRegistry, SubscriptionId};
pub use page::{PageStatus, RemoteServicesPage};
pub use session::SimulatedSession;

// Re-export for convenience
pub use mccr_core::{
    ControllerError, ControllerResult, DeviceError, DeviceSession, FailureKind, OperationId,
    OperationInfo, OperationObserver, OperationParams, OperationResult, OperationState,
    RemoteService,
};
