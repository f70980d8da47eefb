//! Data models shared by the controller, observers and device sessions

mod operation;
mod service;

pub use operation::*;
pub use service::*;
