//! Radio capability consumed by the association controller.
//!
//! The controller never talks to a driver directly. It issues requests through
//! [`Radio`] (scan, associate, disconnect, forget) and receives the host
//! stack's asynchronous answers as [`RadioEvent`]s, which the event loop feeds
//! back into it.

use std::fmt;
use std::net::IpAddr;

/// One access point seen during a scan. Passed through unmodified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// Unquoted SSID as broadcast by the access point.
    pub ssid: String,
    pub bssid: String,
    /// Signal strength. Host stacks report either dBm or a 0-100 quality.
    pub signal: i32,
    /// Security description (e.g. `WPA2`), empty for open networks.
    pub security: String,
}

impl ScanEntry {
    pub fn new(ssid: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            bssid: String::new(),
            signal: 0,
            security: String::new(),
        }
    }
}

/// Snapshot of the network the radio is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// SSID in the host stack's quoted form, e.g. `"HomeNet"`.
    pub ssid: String,
    pub bssid: Option<String>,
    pub ip: Option<IpAddr>,
    /// Identifier of the stored network profile, if any.
    pub network_id: Option<String>,
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SSID: {}", self.ssid)?;
        if let Some(bssid) = &self.bssid {
            write!(f, ", BSSID: {}", bssid)?;
        }
        if let Some(ip) = &self.ip {
            write!(f, ", IP: {}", ip)?;
        }
        Ok(())
    }
}

/// Fine-grained connectivity sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetailedState {
    Idle,
    Scanning,
    Connecting,
    Authenticating,
    ObtainingIpAddr,
    Connected,
    Disconnecting,
    Disconnected,
    Failed,
}

impl DetailedState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

/// Kind of network an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    Wifi,
    Other,
}

/// Payload of a network-state-changed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkState {
    pub kind: NetworkKind,
    pub detailed: DetailedState,
}

impl NetworkState {
    pub fn wifi(detailed: DetailedState) -> Self {
        Self {
            kind: NetworkKind::Wifi,
            detailed,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.detailed.is_connected()
    }
}

/// Asynchronous notifications from the host stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// A scan finished. An empty list means nothing was found.
    ScanResults(Vec<ScanEntry>),
    /// Connectivity changed.
    NetworkStateChanged(NetworkState),
}

/// Which events the controller currently wants delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Subscription {
    #[default]
    None,
    /// Scan results plus network-state changes (searching for the target).
    ScanAndNetworkState,
    /// Network-state changes only (confirming the association).
    NetworkState,
}

impl Subscription {
    /// Check whether an event passes this subscription.
    pub fn accepts(&self, event: &RadioEvent) -> bool {
        match (self, event) {
            (Self::None, _) => false,
            (Self::ScanAndNetworkState, _) => true,
            (Self::NetworkState, RadioEvent::NetworkStateChanged(_)) => true,
            (Self::NetworkState, RadioEvent::ScanResults(_)) => false,
        }
    }
}

/// Radio primitives.
///
/// Requests that complete asynchronously (`start_scan`, `associate`) return
/// whether the request was accepted; their outcome arrives later as a
/// [`RadioEvent`].
pub trait Radio {
    /// Turn the radio on or off.
    fn set_enabled(&mut self, enabled: bool) -> bool;

    /// Request a scan. Results arrive as [`RadioEvent::ScanResults`].
    fn start_scan(&mut self) -> bool;

    /// Join the access point with the given pre-shared key.
    fn associate(&mut self, entry: &ScanEntry, password: &str) -> bool;

    /// Network the radio is currently bound to.
    fn connection_info(&self) -> Option<ConnectionInfo>;

    /// Detach from the current network.
    fn disconnect(&mut self) -> bool;

    /// Remove a stored network profile.
    fn remove_network(&mut self, network_id: &str) -> bool;

    /// Persist profile changes.
    fn save_configuration(&mut self) -> bool;

    /// Replace the active event subscription.
    fn subscribe(&mut self, subscription: Subscription);
}

/// Errors from a concrete radio backend.
#[derive(Debug)]
pub enum RadioError {
    /// Backend tool could not be started.
    Io(std::io::Error),
    /// Backend tool ran but reported failure.
    CommandFailed { command: String, stderr: String },
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::CommandFailed { command, stderr } => {
                write!(f, "'{}' failed: {}", command, stderr.trim())
            }
        }
    }
}

impl std::error::Error for RadioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RadioError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_filters() {
        let scan = RadioEvent::ScanResults(vec![]);
        let state = RadioEvent::NetworkStateChanged(NetworkState::wifi(DetailedState::Connected));

        assert!(!Subscription::None.accepts(&scan));
        assert!(!Subscription::None.accepts(&state));
        assert!(Subscription::ScanAndNetworkState.accepts(&scan));
        assert!(Subscription::ScanAndNetworkState.accepts(&state));
        assert!(!Subscription::NetworkState.accepts(&scan));
        assert!(Subscription::NetworkState.accepts(&state));
    }

    #[test]
    fn test_connection_info_display() {
        let info = ConnectionInfo {
            ssid: "\"HomeNet\"".into(),
            bssid: Some("aa:bb:cc:dd:ee:ff".into()),
            ip: Some("192.168.4.2".parse().unwrap()),
            network_id: None,
        };
        assert_eq!(
            info.to_string(),
            "SSID: \"HomeNet\", BSSID: aa:bb:cc:dd:ee:ff, IP: 192.168.4.2"
        );
    }

    #[test]
    fn test_network_state_connected() {
        assert!(NetworkState::wifi(DetailedState::Connected).is_connected());
        assert!(!NetworkState::wifi(DetailedState::Authenticating).is_connected());
    }
}
