//! mccr-core - Core traits and types for card reader remote services
//!
//! This crate provides the abstractions shared between the remote operation
//! controller and whatever owns the device connection: the [`DeviceSession`]
//! collaborator, the [`OperationObserver`] capability and the operation
//! models that flow between them.

pub mod error;
pub mod models;
pub mod observer;
pub mod session;

pub use error::{ControllerError, ControllerResult, DeviceError, DeviceResult};
pub use models::*;
pub use observer::OperationObserver;
pub use session::DeviceSession;
