//! Error taxonomy.
//!
//! Only [`Error::InvalidParameter`] and [`Error::Busy`] are returned
//! synchronously. Every other variant reaches the caller through exactly one
//! terminal callback of the attempt or session it belongs to.

use crate::config::ConfigError;
use std::fmt;

/// Which timer expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Association did not complete within the setup timeout.
    Setup,
    /// A command received no response in time.
    Command,
}

/// Errors surfaced to callers of the association controller and sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Bad SSID or password; rejected before any state change.
    InvalidParameter(ConfigError),
    /// An association attempt is already in flight.
    Busy,
    /// Target SSID was not in the scan results.
    SsidNotFound,
    /// The access point rejected the pre-shared key.
    AuthenticationError,
    /// Transport or connect failure.
    Network(String),
    /// Setup or command timeout.
    Timeout(TimeoutKind),
    /// Malformed response. Logged and treated as "not yet complete".
    Protocol(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter(e) => write!(f, "invalid parameter: {}", e),
            Self::Busy => write!(f, "an association attempt is already in progress"),
            Self::SsidNotFound => write!(f, "SSID not found"),
            Self::AuthenticationError => write!(f, "authentication error"),
            Self::Network(msg) => write!(f, "network error: {}", msg),
            Self::Timeout(TimeoutKind::Setup) => write!(f, "association timed out"),
            Self::Timeout(TimeoutKind::Command) => write!(f, "command timed out"),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidParameter(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::InvalidParameter(e)
    }
}
