//! Remote service categories

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The named operation category a controller manages.
///
/// A controller handles exactly one of these for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteService {
    /// Remote key injection through the vendor remote services endpoint
    #[default]
    KeyInjection,
    /// Firmware push to the reader
    FirmwareUpdate,
    /// Device configuration push
    ConfigurationUpdate,
}

impl RemoteService {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteService::KeyInjection => "key_injection",
            RemoteService::FirmwareUpdate => "firmware_update",
            RemoteService::ConfigurationUpdate => "configuration_update",
        }
    }

    /// Human-readable label for presentation layers
    pub fn label(&self) -> &'static str {
        match self {
            RemoteService::KeyInjection => "Remote key injection",
            RemoteService::FirmwareUpdate => "Firmware update",
            RemoteService::ConfigurationUpdate => "Configuration update",
        }
    }
}

impl fmt::Display for RemoteService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemoteService {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "key_injection" | "keys" => Ok(RemoteService::KeyInjection),
            "firmware_update" | "firmware" => Ok(RemoteService::FirmwareUpdate),
            "configuration_update" | "config" => Ok(RemoteService::ConfigurationUpdate),
            other => Err(format!("Unknown remote service: {}", other)),
        }
    }
}
