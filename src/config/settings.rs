//! Runtime settings.
//!
//! Timings and endpoint defaults match what the device firmware expects. A JSON
//! settings file may override any subset of them:
//!
//! ```json
//! {
//!   "endpoint": "ws://192.168.4.1/web.cgi",
//!   "association": { "setup_timeout_ms": 45000 },
//!   "poll": { "period_ms": 1000 }
//! }
//! ```

use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// WebSocket endpoint exposed by the access point's device.
pub const DEFAULT_ENDPOINT: &str = "ws://192.168.4.1/web.cgi";

/// Association setup timeout.
pub const SETUP_TIMEOUT_MS: u64 = 30_000;

/// Delay between confirming the target network and reporting Connected, so
/// routes are usable before the caller opens sockets.
pub const CONNECTED_GRACE_MS: u64 = 500;

/// Socket connect timeout.
pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Delay before closing the socket after a write-only command.
pub const CLOSE_GRACE_MS: u64 = 50;

/// Time allowed for a response to a pending command.
pub const COMMAND_TIMEOUT_MS: u64 = 1_000;

/// First poll tick after the start command.
pub const POLL_FIRST_MS: u64 = 3_000;

/// Interval between poll ticks.
pub const POLL_PERIOD_MS: u64 = 2_000;

/// Times a failed polling session starts over before reporting the error.
pub const POLL_RESTARTS: u32 = 2;

/// Association controller timings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationSettings {
    pub setup_timeout_ms: u64,
    pub connected_grace_ms: u64,
}

impl Default for AssociationSettings {
    fn default() -> Self {
        Self {
            setup_timeout_ms: SETUP_TIMEOUT_MS,
            connected_grace_ms: CONNECTED_GRACE_MS,
        }
    }
}

impl AssociationSettings {
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    pub fn connected_grace(&self) -> Duration {
        Duration::from_millis(self.connected_grace_ms)
    }
}

/// Session engine timings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub connect_timeout_ms: u64,
    pub close_grace_ms: u64,
    pub command_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            close_grace_ms: CLOSE_GRACE_MS,
            command_timeout_ms: COMMAND_TIMEOUT_MS,
        }
    }
}

impl SessionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Polling session timings and commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub first_ms: u64,
    pub period_ms: u64,
    /// Write-only command that starts the remote operation.
    pub start_command: String,
    /// Read command that fetches the operation's result.
    pub fetch_command: String,
    /// Restarts from the start command after an error before giving up.
    pub restarts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            first_ms: POLL_FIRST_MS,
            period_ms: POLL_PERIOD_MS,
            start_command: "wifi_scan=1".to_string(),
            fetch_command: "wifi_scan".to_string(),
            restarts: POLL_RESTARTS,
        }
    }
}

impl PollSettings {
    pub fn first(&self) -> Duration {
        Duration::from_millis(self.first_ms)
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// All runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub endpoint: String,
    /// Read command issued once the scan list is retrieved.
    pub status_command: String,
    pub association: AssociationSettings,
    pub session: SessionSettings,
    pub poll: PollSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            status_command: "wifi_st_sta".to_string(),
            association: AssociationSettings::default(),
            session: SessionSettings::default(),
            poll: PollSettings::default(),
        }
    }
}

impl Settings {
    /// Parse settings from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        serde_json::from_str(json).map_err(SettingsError::Parse)
    }

    /// Load settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let json = std::fs::read_to_string(path).map_err(SettingsError::Io)?;
        let settings = Self::from_json(&json)?;
        info!("Loaded settings from {:?}", path);
        Ok(settings)
    }
}

/// Errors loading a settings file.
#[derive(Debug)]
pub enum SettingsError {
    /// File could not be read.
    Io(std::io::Error),
    /// File is not valid settings JSON.
    Parse(serde_json::Error),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read settings: {}", e),
            Self::Parse(e) => write!(f, "invalid settings: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
        }
    }
}
