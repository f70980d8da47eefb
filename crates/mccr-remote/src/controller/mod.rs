//! Remote operation controller
//!
//! This module owns the single-flight state machine, drives the device call
//! out-of-line and delivers start/finish notifications to observers.

mod handle;
mod remote;

pub use handle::OperationHandle;
pub use remote::RemoteOperationController;
