//! Association controller.
//!
//! Drives one attempt through scan → associate → authenticate → confirm and
//! reports exactly one terminal outcome to the attempt's listener.
//!
//! # Phases
//!
//! The current [`AssociationState`] is the phase. One handler function
//! dispatches on it, and the radio subscription is swapped together with the
//! state at each phase boundary:
//!
//! | State | Subscription | Accepts |
//! |-------|--------------|---------|
//! | `ScanningForSsid` | `ScanAndNetworkState` | scan results, network state |
//! | `Associating` | `NetworkState` | network state (confirmation) |
//! | `AwaitingConfirmation` | `None` | nothing, grace delay pending |
//!
//! Link-layer association and IP readiness arrive as separate events, which
//! is why confirmation is a phase of its own and why Connected is reported
//! only after a short grace delay.

use super::radio::{ConnectionInfo, DetailedState, NetworkKind, NetworkState, Radio, RadioEvent};
use super::radio::{ScanEntry, Subscription};
use crate::config::{AssociationSettings, Credentials};
use crate::error::Error;
use crate::scheduler::{Task, TimerId, Timers};
use log::{debug, error, info, warn};
use tokio::sync::mpsc::UnboundedSender;

/// Association state. Terminal states end the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationState {
    Idle,
    ScanningForSsid,
    Associating,
    AwaitingConfirmation,
    Connected,
    SsidNotFound,
    AuthenticationError,
    Disconnected,
    TimedOut,
}

impl AssociationState {
    /// True while an attempt owns the radio.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            Self::ScanningForSsid | Self::Associating | Self::AwaitingConfirmation
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Connected
                | Self::SsidNotFound
                | Self::AuthenticationError
                | Self::Disconnected
                | Self::TimedOut
        )
    }
}

/// Receives the outcome of an association attempt.
pub trait AssociationListener {
    /// Target network confirmed and usable.
    fn on_connected(&mut self, info: &ConnectionInfo);

    /// Bound to a network other than the target.
    fn on_disconnected(&mut self);

    /// Target SSID missing from the scan results.
    fn on_ssid_not_found(&mut self);

    /// The access point rejected the password.
    fn on_authentication_error(&mut self);

    /// Informational: target found, association requested.
    fn on_ssid_found(&mut self, _entry: &ScanEntry) {}

    /// Setup timeout elapsed.
    fn on_timeout(&mut self);
}

/// Listener callbacks as values, for channel-based consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationEvent {
    Connected(ConnectionInfo),
    Disconnected,
    SsidNotFound,
    AuthenticationError,
    SsidFound(ScanEntry),
    Timeout,
}

impl AssociationEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::SsidFound(_))
    }

    /// Error equivalent of a failed outcome.
    pub fn as_error(&self) -> Option<Error> {
        match self {
            Self::SsidNotFound => Some(Error::SsidNotFound),
            Self::AuthenticationError => Some(Error::AuthenticationError),
            Self::Disconnected => Some(Error::Network("bound to another network".into())),
            Self::Timeout => Some(Error::Timeout(crate::error::TimeoutKind::Setup)),
            Self::Connected(_) | Self::SsidFound(_) => None,
        }
    }
}

impl AssociationListener for UnboundedSender<AssociationEvent> {
    fn on_connected(&mut self, info: &ConnectionInfo) {
        let _ = self.send(AssociationEvent::Connected(info.clone()));
    }

    fn on_disconnected(&mut self) {
        let _ = self.send(AssociationEvent::Disconnected);
    }

    fn on_ssid_not_found(&mut self) {
        let _ = self.send(AssociationEvent::SsidNotFound);
    }

    fn on_authentication_error(&mut self) {
        let _ = self.send(AssociationEvent::AuthenticationError);
    }

    fn on_ssid_found(&mut self, entry: &ScanEntry) {
        let _ = self.send(AssociationEvent::SsidFound(entry.clone()));
    }

    fn on_timeout(&mut self) {
        let _ = self.send(AssociationEvent::Timeout);
    }
}

/// State owned by one in-flight attempt.
struct Attempt {
    credentials: Credentials,
    listener: Box<dyn AssociationListener>,
    setup_timer: Option<TimerId>,
    grace_timer: Option<TimerId>,
    /// Last detailed state seen while confirming.
    last_detailed: Option<DetailedState>,
    /// Connection confirmed, waiting for the grace delay.
    confirmed: Option<ConnectionInfo>,
}

/// Association controller for a single radio.
pub struct AssociationController<R> {
    radio: R,
    settings: AssociationSettings,
    state: AssociationState,
    subscription: Subscription,
    attempt: Option<Attempt>,
}

impl<R: Radio> AssociationController<R> {
    pub fn new(radio: R, settings: AssociationSettings) -> Self {
        Self {
            radio,
            settings,
            state: AssociationState::Idle,
            subscription: Subscription::None,
            attempt: None,
        }
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Start connecting to `ssid`.
    ///
    /// Fails synchronously with [`Error::InvalidParameter`] for an empty SSID
    /// or a password shorter than six characters, and with [`Error::Busy`]
    /// while another attempt is in progress. Neither failure touches the radio
    /// or calls the listener.
    pub fn connect<L>(
        &mut self,
        ssid: &str,
        password: &str,
        listener: L,
        timers: &mut Timers,
    ) -> Result<(), Error>
    where
        L: AssociationListener + 'static,
    {
        let credentials = Credentials::new(ssid, password)?;
        if self.state.is_in_progress() {
            return Err(Error::Busy);
        }

        info!("Connecting to SSID {}", credentials.ssid());
        if !self.radio.set_enabled(true) {
            warn!("Failed to enable radio, scanning anyway");
        }
        self.set_subscription(Subscription::ScanAndNetworkState);
        self.state = AssociationState::ScanningForSsid;

        let setup_timer = timers.schedule(self.settings.setup_timeout(), Task::SetupTimeout);
        self.attempt = Some(Attempt {
            credentials,
            listener: Box::new(listener),
            setup_timer: Some(setup_timer),
            grace_timer: None,
            last_detailed: None,
            confirmed: None,
        });

        if !self.radio.start_scan() {
            warn!("Scan request rejected, waiting for scan results anyway");
        }
        Ok(())
    }

    /// Detach from the current network.
    ///
    /// Does not cancel an in-flight attempt; call [`cancel`](Self::cancel) first.
    pub fn disconnect(&mut self) -> bool {
        info!("Disconnecting from current network");
        self.radio.disconnect()
    }

    /// Remove the current network's stored profile and persist the removal.
    ///
    /// Returns true only if both steps succeed. Returns false when there is no
    /// current network.
    pub fn forget(&mut self) -> bool {
        let network_id = match self.radio.connection_info().and_then(|i| i.network_id) {
            Some(id) => id,
            None => {
                warn!("No current network to forget");
                return false;
            }
        };
        info!("Forgetting network {}", network_id);
        let removed = self.radio.remove_network(&network_id);
        let saved = self.radio.save_configuration();
        removed && saved
    }

    /// Abandon the in-flight attempt without notifying its listener.
    ///
    /// Returns true if an attempt was cancelled.
    pub fn cancel(&mut self, timers: &mut Timers) -> bool {
        let Some(mut attempt) = self.attempt.take() else {
            return false;
        };
        cancel_timer(&mut attempt.setup_timer, timers);
        cancel_timer(&mut attempt.grace_timer, timers);
        self.set_subscription(Subscription::None);
        self.state = AssociationState::Idle;
        info!("Association attempt cancelled");
        true
    }

    /// Feed a radio event into the state machine.
    pub fn handle_event(&mut self, event: RadioEvent, timers: &mut Timers) {
        if !self.subscription.accepts(&event) {
            debug!("Ignoring {:?} in state {:?}", event, self.state);
            return;
        }
        match (self.state, event) {
            (AssociationState::ScanningForSsid, RadioEvent::ScanResults(results)) => {
                self.on_scan_results(results, timers)
            }
            (AssociationState::ScanningForSsid, RadioEvent::NetworkStateChanged(state)) => {
                self.on_search_network_state(state, timers)
            }
            (AssociationState::Associating, RadioEvent::NetworkStateChanged(state)) => {
                self.on_confirm_network_state(state, timers)
            }
            (state, event) => debug!("Ignoring {:?} in state {:?}", event, state),
        }
    }

    /// Handle a fired association task.
    pub fn handle_timer(&mut self, id: TimerId, task: Task, timers: &mut Timers) {
        let Some(attempt) = self.attempt.as_mut() else {
            debug!("Stale {:?} with no attempt", task);
            return;
        };
        match task {
            Task::SetupTimeout if attempt.setup_timer == Some(id) => {
                attempt.setup_timer = None;
                warn!("Association timed out in state {:?}", self.state);
                if let Some(mut attempt) = self.finish(AssociationState::TimedOut, timers) {
                    attempt.listener.on_timeout();
                }
            }
            Task::ConnectedGrace if attempt.grace_timer == Some(id) => {
                attempt.grace_timer = None;
                if let Some(mut attempt) = self.finish(AssociationState::Connected, timers) {
                    if let Some(info) = attempt.confirmed.take() {
                        info!("Connected: {}", info);
                        attempt.listener.on_connected(&info);
                    }
                }
            }
            _ => debug!("Stale {:?}", task),
        }
    }

    fn on_scan_results(&mut self, results: Vec<ScanEntry>, timers: &mut Timers) {
        let Some(attempt) = self.attempt.as_mut() else {
            return;
        };
        debug!("Scan returned {} networks", results.len());
        let target = attempt.credentials.ssid();
        let Some(entry) = results.into_iter().find(|e| e.ssid == target) else {
            error!("SSID {} not found", target);
            if let Some(mut attempt) = self.finish(AssociationState::SsidNotFound, timers) {
                attempt.listener.on_ssid_not_found();
            }
            return;
        };

        info!("SSID {} found, associating", entry.ssid);
        if !self.radio.associate(&entry, attempt.credentials.password()) {
            warn!("Associate request rejected for {}", entry.ssid);
        }
        self.subscription = Subscription::NetworkState;
        self.radio.subscribe(Subscription::NetworkState);
        self.state = AssociationState::Associating;
        attempt.listener.on_ssid_found(&entry);
    }

    fn on_search_network_state(&mut self, state: NetworkState, timers: &mut Timers) {
        if state.kind != NetworkKind::Wifi {
            return;
        }
        debug!("Network state while searching: {:?}", state.detailed);
        if state.is_connected() {
            if let Some(info) = self.bound_target() {
                self.confirm(info, timers);
                return;
            }
        }
        debug!("Target not bound yet, rescanning");
        self.radio.start_scan();
    }

    fn on_confirm_network_state(&mut self, state: NetworkState, timers: &mut Timers) {
        if state.kind != NetworkKind::Wifi {
            warn!("Network state change is not for wifi");
            return;
        }
        debug!("Network state while confirming: {:?}", state.detailed);

        if state.is_connected() {
            let Some(info) = self.radio.connection_info() else {
                error!("Connected but no connection info");
                return;
            };
            let is_target = self
                .attempt
                .as_ref()
                .is_some_and(|a| a.credentials.matches_bound_ssid(&info.ssid));
            if is_target {
                self.confirm(info, timers);
            } else {
                error!("Connected to {} instead of the target", info.ssid);
                if let Some(mut attempt) = self.finish(AssociationState::Disconnected, timers) {
                    attempt.listener.on_disconnected();
                }
            }
            return;
        }

        let Some(attempt) = self.attempt.as_mut() else {
            return;
        };
        let rejected = attempt.last_detailed == Some(DetailedState::Authenticating)
            && state.detailed == DetailedState::Disconnected;
        if rejected {
            error!("Authentication failed for {}", attempt.credentials.ssid());
            if let Some(mut attempt) = self.finish(AssociationState::AuthenticationError, timers) {
                attempt.listener.on_authentication_error();
            }
        } else {
            attempt.last_detailed = Some(state.detailed);
        }
    }

    /// Connection info if the radio is bound to the target SSID.
    fn bound_target(&self) -> Option<ConnectionInfo> {
        let attempt = self.attempt.as_ref()?;
        self.radio
            .connection_info()
            .filter(|info| attempt.credentials.matches_bound_ssid(&info.ssid))
    }

    /// Target confirmed: stop the setup timer, detach from events and report
    /// Connected after the grace delay.
    fn confirm(&mut self, info: ConnectionInfo, timers: &mut Timers) {
        let Some(attempt) = self.attempt.as_mut() else {
            return;
        };
        cancel_timer(&mut attempt.setup_timer, timers);
        info!("Target network bound ({}), waiting for routes", info);
        attempt.confirmed = Some(info);
        let grace = timers.schedule(self.settings.connected_grace(), Task::ConnectedGrace);
        attempt.grace_timer = Some(grace);
        self.set_subscription(Subscription::None);
        self.state = AssociationState::AwaitingConfirmation;
    }

    /// Enter a terminal state: cancel timers, unsubscribe and hand back the
    /// attempt so the caller can notify its listener.
    fn finish(&mut self, state: AssociationState, timers: &mut Timers) -> Option<Attempt> {
        let mut attempt = self.attempt.take()?;
        cancel_timer(&mut attempt.setup_timer, timers);
        cancel_timer(&mut attempt.grace_timer, timers);
        self.set_subscription(Subscription::None);
        self.state = state;
        Some(attempt)
    }

    fn set_subscription(&mut self, subscription: Subscription) {
        self.subscription = subscription;
        self.radio.subscribe(subscription);
    }
}

fn cancel_timer(timer: &mut Option<TimerId>, timers: &mut Timers) {
    if let Some(id) = timer.take() {
        timers.cancel(id);
    }
}
