//! Host radio backed by NetworkManager.
//!
//! Shells out to `nmcli` for the radio primitives and follows `nmcli monitor`
//! for connectivity changes. Radio power, scans and association requests run
//! as spawned tasks and report back through the event channel returned by
//! [`NmcliRadio::start`], so they return immediately.
//!
//! The monitor task refreshes the cached [`ConnectionInfo`] before it forwards
//! a state change, so [`Radio::connection_info`] never runs a process.
//! `disconnect`, `remove_network` and `save_configuration` act synchronously.
//!
//! Events are only forwarded while the current [`Subscription`] accepts them.
//!
//! Must be started from within a tokio runtime.

use super::radio::{ConnectionInfo, DetailedState, NetworkKind, NetworkState, Radio, RadioError};
use super::radio::{RadioEvent, ScanEntry, Subscription};
use log::{debug, error, warn};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

const NMCLI: &str = "nmcli";

/// Command line used to invoke `nmcli`.
#[derive(Debug, Clone)]
struct Nmcli {
    program: String,
    prefix: Vec<String>,
}

impl Nmcli {
    fn new(command: &[&str]) -> Result<Self, RadioError> {
        let (program, prefix) = command.split_first().ok_or_else(|| {
            RadioError::CommandFailed {
                command: String::new(),
                stderr: "empty nmcli command line".into(),
            }
        })?;
        Ok(Self {
            program: program.to_string(),
            prefix: prefix.iter().map(|arg| arg.to_string()).collect(),
        })
    }

    fn command(&self, args: &[&str]) -> std::process::Command {
        let mut command = std::process::Command::new(&self.program);
        command.args(&self.prefix).args(args);
        command
    }

    async fn run(&self, args: &[&str]) -> Result<String, RadioError> {
        let output = tokio::process::Command::from(self.command(args))
            .output()
            .await?;
        check_output(args, output)
    }

    fn run_blocking(&self, args: &[&str]) -> Result<String, RadioError> {
        let output = self.command(args).output()?;
        check_output(args, output)
    }
}

/// NetworkManager-backed [`Radio`].
pub struct NmcliRadio {
    nmcli: Nmcli,
    iface: String,
    events: mpsc::UnboundedSender<RadioEvent>,
    subscription: watch::Sender<Subscription>,
    current: Arc<watch::Sender<Option<ConnectionInfo>>>,
    shutdown: CancellationToken,
}

impl NmcliRadio {
    /// Start the radio on `iface`, or on the first wifi device if `None`.
    ///
    /// Spawns the `nmcli monitor` watcher, which stops when the radio is
    /// dropped.
    pub async fn start(
        iface: Option<&str>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RadioEvent>), RadioError> {
        Self::start_with(&[NMCLI], iface).await
    }

    /// Like [`start`](Self::start), invoking NetworkManager through `command`
    /// instead of plain `nmcli` (e.g. `["sudo", "nmcli"]`).
    pub async fn start_with(
        command: &[&str],
        iface: Option<&str>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RadioEvent>), RadioError> {
        let nmcli = Nmcli::new(command)?;
        let iface = match iface {
            Some(name) => name.to_string(),
            None => find_wifi_device(&nmcli).await?,
        };

        let (events, rx) = mpsc::unbounded_channel();
        let (subscription, _) = watch::channel(Subscription::None);
        let (current, _) = watch::channel(fetch_connection_info(&nmcli, &iface).await);
        let current = Arc::new(current);
        let shutdown = CancellationToken::new();

        let mut monitor = tokio::process::Command::from(nmcli.command(&["monitor"]))
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = monitor.stdout.take().ok_or_else(|| RadioError::CommandFailed {
            command: "nmcli monitor".into(),
            stderr: "no stdout".into(),
        })?;

        let token = shutdown.clone();
        let tx = events.clone();
        let sub = subscription.subscribe();
        let cache = Arc::clone(&current);
        let tool = nmcli.clone();
        let device = iface.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let Some(state) = parse_monitor_line(&line, &device) else {
                                continue;
                            };
                            debug!("nmcli monitor: {}", line);
                            if state.kind == NetworkKind::Wifi {
                                let info = if state.is_connected() {
                                    fetch_connection_info(&tool, &device).await
                                } else {
                                    None
                                };
                                cache.send_replace(info);
                            }
                            let event = RadioEvent::NetworkStateChanged(state);
                            if sub.borrow().accepts(&event) && tx.send(event).is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            warn!("nmcli monitor exited");
                            break;
                        }
                        Err(e) => {
                            error!("nmcli monitor read failed: {}", e);
                            break;
                        }
                    }
                }
            }
            drop(monitor);
        });

        Ok((
            Self {
                nmcli,
                iface,
                events,
                subscription,
                current,
                shutdown,
            },
            rx,
        ))
    }

    /// Interface this radio drives.
    pub fn iface(&self) -> &str {
        &self.iface
    }

    fn run_ok(&self, args: &[&str]) -> bool {
        match self.nmcli.run_blocking(args) {
            Ok(_) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }
}

impl Drop for NmcliRadio {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Radio for NmcliRadio {
    fn set_enabled(&mut self, enabled: bool) -> bool {
        let nmcli = self.nmcli.clone();
        tokio::spawn(async move {
            let state = if enabled { "on" } else { "off" };
            match nmcli.run(&["radio", "wifi", state]).await {
                Ok(_) => debug!("Wifi radio {}", state),
                Err(e) => warn!("Switching wifi radio {} failed: {}", state, e),
            }
        });
        true
    }

    fn start_scan(&mut self) -> bool {
        let nmcli = self.nmcli.clone();
        let iface = self.iface.clone();
        let tx = self.events.clone();
        let sub = self.subscription.subscribe();
        tokio::spawn(async move {
            if let Err(e) = nmcli.run(&["device", "wifi", "rescan", "ifname", &iface]).await {
                // NetworkManager refuses back-to-back rescans; the cached list is still fresh.
                debug!("Rescan not started: {}", e);
            }
            let listing = nmcli
                .run(&[
                    "-t",
                    "-f",
                    "SSID,BSSID,SIGNAL,SECURITY",
                    "device",
                    "wifi",
                    "list",
                    "ifname",
                    &iface,
                ])
                .await;
            let results = match listing {
                Ok(out) => parse_scan_list(&out),
                Err(e) => {
                    warn!("Scan listing failed: {}", e);
                    Vec::new()
                }
            };
            let event = RadioEvent::ScanResults(results);
            if sub.borrow().accepts(&event) {
                let _ = tx.send(event);
            }
        });
        true
    }

    fn associate(&mut self, entry: &ScanEntry, password: &str) -> bool {
        let nmcli = self.nmcli.clone();
        let iface = self.iface.clone();
        let ssid = entry.ssid.clone();
        let password = zeroize::Zeroizing::new(password.to_string());
        tokio::spawn(async move {
            let result = nmcli
                .run(&[
                    "device",
                    "wifi",
                    "connect",
                    &ssid,
                    "password",
                    password.as_str(),
                    "ifname",
                    &iface,
                ])
                .await;
            match result {
                Ok(_) => debug!("nmcli accepted connection to {}", ssid),
                Err(e) => warn!("Connecting to {} failed: {}", ssid, e),
            }
        });
        true
    }

    fn connection_info(&self) -> Option<ConnectionInfo> {
        self.current.borrow().clone()
    }

    fn disconnect(&mut self) -> bool {
        let ok = self.run_ok(&["device", "disconnect", &self.iface]);
        if ok {
            self.current.send_replace(None);
        }
        ok
    }

    fn remove_network(&mut self, network_id: &str) -> bool {
        self.run_ok(&["connection", "delete", "id", network_id])
    }

    fn save_configuration(&mut self) -> bool {
        // Profiles are written by NetworkManager itself; reload makes the
        // removal visible to every client.
        self.run_ok(&["connection", "reload"])
    }

    fn subscribe(&mut self, subscription: Subscription) {
        debug!("Radio subscription: {:?}", subscription);
        self.subscription.send_replace(subscription);
    }
}

/// Query the network `iface` is bound to, if any.
async fn fetch_connection_info(nmcli: &Nmcli, iface: &str) -> Option<ConnectionInfo> {
    let wifi = nmcli
        .run(&[
            "-t", "-f", "ACTIVE,SSID,BSSID", "device", "wifi", "list", "ifname", iface,
            "--rescan", "no",
        ])
        .await
        .map_err(|e| warn!("{}", e))
        .ok()?;
    let (ssid, bssid) = parse_active_network(&wifi)?;

    let details = nmcli
        .run(&["-t", "-f", "GENERAL.CONNECTION,IP4.ADDRESS", "device", "show", iface])
        .await
        .map_err(|e| warn!("{}", e))
        .ok()?;
    let (network_id, ip) = parse_device_details(&details);

    Some(ConnectionInfo {
        ssid: crate::config::quote_ssid(&ssid),
        bssid: Some(bssid),
        ip,
        network_id,
    })
}

fn check_output(args: &[&str], output: std::process::Output) -> Result<String, RadioError> {
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(RadioError::CommandFailed {
            command: describe(args),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Command line for logs, with any password argument masked.
fn describe(args: &[&str]) -> String {
    let mut parts = vec![NMCLI.to_string()];
    let mut mask = false;
    for arg in args {
        parts.push(if mask { "****".to_string() } else { arg.to_string() });
        mask = *arg == "password";
    }
    parts.join(" ")
}

async fn find_wifi_device(nmcli: &Nmcli) -> Result<String, RadioError> {
    let out = nmcli.run(&["-t", "-f", "DEVICE,TYPE", "device"]).await?;
    out.lines()
        .map(split_terse)
        .find(|fields| fields.get(1).map(String::as_str) == Some("wifi"))
        .and_then(|fields| fields.into_iter().next())
        .ok_or_else(|| RadioError::CommandFailed {
            command: "nmcli device".into(),
            stderr: "no wifi device found".into(),
        })
}

/// Split one line of `nmcli -t` output into fields.
///
/// Colons inside values are escaped as `\:` and backslashes as `\\`.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn parse_scan_list(out: &str) -> Vec<ScanEntry> {
    out.lines()
        .map(split_terse)
        .filter(|f| f.len() >= 4 && !f[0].is_empty())
        .map(|f| ScanEntry {
            ssid: f[0].clone(),
            bssid: f[1].clone(),
            signal: f[2].parse().unwrap_or(0),
            security: f[3].clone(),
        })
        .collect()
}

/// SSID and BSSID of the active access point in an `ACTIVE,SSID,BSSID` listing.
fn parse_active_network(out: &str) -> Option<(String, String)> {
    out.lines()
        .map(split_terse)
        .find(|f| f.len() >= 3 && f[0] == "yes")
        .map(|f| (f[1].clone(), f[2].clone()))
}

/// Connection profile name and IPv4 address from `device show` terse output.
fn parse_device_details(out: &str) -> (Option<String>, Option<std::net::IpAddr>) {
    let mut network_id = None;
    let mut ip = None;
    for line in out.lines() {
        let fields = split_terse(line);
        let (Some(key), Some(value)) = (fields.first(), fields.get(1)) else {
            continue;
        };
        if key == "GENERAL.CONNECTION" && !value.is_empty() && value != "--" {
            network_id = Some(value.clone());
        } else if key.starts_with("IP4.ADDRESS") && ip.is_none() {
            ip = value.split('/').next().and_then(|a| a.parse().ok());
        }
    }
    (network_id, ip)
}

/// Map an `nmcli monitor` device line to a network state.
///
/// Lines for other devices are reported as [`NetworkKind::Other`]; lines that
/// are not device state changes yield `None`.
fn parse_monitor_line(line: &str, iface: &str) -> Option<NetworkState> {
    let (device, status) = line.split_once(": ")?;
    if device.contains(' ') {
        return None;
    }
    let detailed = match status.trim() {
        s if s.starts_with("connecting (need authentication)") => DetailedState::Authenticating,
        s if s.starts_with("connecting (getting IP configuration)")
            || s.starts_with("connecting (checking IP connectivity)") =>
        {
            DetailedState::ObtainingIpAddr
        }
        s if s.starts_with("connecting") => DetailedState::Connecting,
        s if s.starts_with("connected") => DetailedState::Connected,
        "disconnecting" | "deactivating" => DetailedState::Disconnecting,
        "disconnected" | "connection failed" => DetailedState::Disconnected,
        "unavailable" => DetailedState::Idle,
        "failed" => DetailedState::Failed,
        _ => return None,
    };
    let kind = if device == iface {
        NetworkKind::Wifi
    } else {
        NetworkKind::Other
    };
    Some(NetworkState { kind, detailed })
}
