//! Observer registry for operation lifecycle notifications

mod registry;

pub use registry::{ObserverRegistry, SubscriptionId};
