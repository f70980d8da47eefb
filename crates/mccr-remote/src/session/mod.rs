//! Device session implementations
//!
//! Real readers are attached by implementing [`mccr_core::DeviceSession`] on
//! top of the vendor transport. This module provides the simulated reader
//! used by tests and the runner binary.

mod simulated;

pub use simulated::SimulatedSession;
