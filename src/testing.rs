//! Scripted fakes for the state machine tests.
//!
//! Every fake records what the code under test asked of it so tests can
//! assert on the exact sequence of radio calls, socket writes and handler
//! callbacks without any real I/O.

use crate::error::Error;
use crate::scheduler::Timers;
use crate::session::{
    Command, Connector, ResultListener, SessionHandler, SessionId, SessionOutcome, Socket,
};
use crate::wifi::{
    AssociationEvent, AssociationListener, ConnectionInfo, Radio, ScanEntry, Subscription,
};
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

// ==================== Event Log ====================

/// Shared, cloneable record of listener callbacks.
#[derive(Debug)]
pub struct EventLog<T>(Rc<RefCell<Vec<T>>>);

impl<T> Clone for EventLog<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: Clone> EventLog<T> {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn push(&self, event: T) {
        self.0.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<T> {
        self.0.borrow().clone()
    }
}

impl AssociationListener for EventLog<AssociationEvent> {
    fn on_connected(&mut self, info: &ConnectionInfo) {
        self.push(AssociationEvent::Connected(info.clone()));
    }

    fn on_disconnected(&mut self) {
        self.push(AssociationEvent::Disconnected);
    }

    fn on_ssid_not_found(&mut self) {
        self.push(AssociationEvent::SsidNotFound);
    }

    fn on_authentication_error(&mut self) {
        self.push(AssociationEvent::AuthenticationError);
    }

    fn on_ssid_found(&mut self, entry: &ScanEntry) {
        self.push(AssociationEvent::SsidFound(entry.clone()));
    }

    fn on_timeout(&mut self) {
        self.push(AssociationEvent::Timeout);
    }
}

impl ResultListener for EventLog<SessionOutcome> {
    fn on_result(&mut self, response: String) {
        self.push(SessionOutcome::Result(response));
    }

    fn on_error(&mut self, error: Error) {
        self.push(SessionOutcome::Error(error));
    }
}

// ==================== Fake Radio ====================

/// Radio that records every primitive call.
#[derive(Debug)]
pub struct FakeRadio {
    pub enabled: bool,
    pub scans: usize,
    /// Last associate request as (ssid, password).
    pub associated: Option<(String, String)>,
    /// What `connection_info` reports.
    pub info: Option<ConnectionInfo>,
    pub disconnects: usize,
    pub removed: Vec<String>,
    pub saves: usize,
    pub save_ok: bool,
    pub subscription: Subscription,
}

impl Default for FakeRadio {
    fn default() -> Self {
        Self {
            enabled: false,
            scans: 0,
            associated: None,
            info: None,
            disconnects: 0,
            removed: Vec::new(),
            saves: 0,
            save_ok: true,
            subscription: Subscription::None,
        }
    }
}

impl Radio for FakeRadio {
    fn set_enabled(&mut self, enabled: bool) -> bool {
        self.enabled = enabled;
        true
    }

    fn start_scan(&mut self) -> bool {
        self.scans += 1;
        true
    }

    fn associate(&mut self, entry: &ScanEntry, password: &str) -> bool {
        self.associated = Some((entry.ssid.clone(), password.to_string()));
        true
    }

    fn connection_info(&self) -> Option<ConnectionInfo> {
        self.info.clone()
    }

    fn disconnect(&mut self) -> bool {
        self.disconnects += 1;
        self.info = None;
        true
    }

    fn remove_network(&mut self, network_id: &str) -> bool {
        self.removed.push(network_id.to_string());
        true
    }

    fn save_configuration(&mut self) -> bool {
        self.saves += 1;
        self.save_ok
    }

    fn subscribe(&mut self, subscription: Subscription) {
        self.subscription = subscription;
    }
}

// ==================== Fake Transport ====================

#[derive(Debug, Default)]
struct Wire {
    opened: Vec<(SessionId, String, Duration)>,
    sent: Vec<String>,
    disconnected: Vec<SessionId>,
    rejected: HashSet<String>,
    fail_sends: bool,
}

/// Connector whose sockets write into a shared record.
#[derive(Debug, Clone, Default)]
pub struct FakeConnector(Rc<RefCell<Wire>>);

impl FakeConnector {
    /// Make `connect` fail synchronously for `uri`.
    pub fn reject_uri(&mut self, uri: &str) {
        self.0.borrow_mut().rejected.insert(uri.to_string());
    }

    /// Make every later `send_text` fail.
    pub fn fail_sends(&self) {
        self.0.borrow_mut().fail_sends = true;
    }

    pub fn opened(&self) -> Vec<(SessionId, String, Duration)> {
        self.0.borrow().opened.clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.0.borrow().sent.clone()
    }

    /// True if any socket was closed from our side.
    pub fn disconnected(&self) -> bool {
        !self.0.borrow().disconnected.is_empty()
    }

    pub fn disconnected_ids(&self) -> Vec<SessionId> {
        self.0.borrow().disconnected.clone()
    }
}

impl Connector for FakeConnector {
    type Socket = FakeSocket;

    fn connect(
        &mut self,
        id: SessionId,
        uri: &str,
        timeout: Duration,
    ) -> Result<FakeSocket, String> {
        let mut wire = self.0.borrow_mut();
        if wire.rejected.contains(uri) {
            return Err(format!("invalid URI '{}'", uri));
        }
        wire.opened.push((id, uri.to_string(), timeout));
        Ok(FakeSocket {
            id,
            wire: Rc::clone(&self.0),
        })
    }
}

#[derive(Debug)]
pub struct FakeSocket {
    id: SessionId,
    wire: Rc<RefCell<Wire>>,
}

impl Socket for FakeSocket {
    fn send_text(&mut self, text: &str) -> bool {
        let mut wire = self.wire.borrow_mut();
        if wire.fail_sends {
            return false;
        }
        wire.sent.push(text.to_string());
        true
    }

    fn disconnect(&mut self) {
        self.wire.borrow_mut().disconnected.push(self.id);
    }
}

// ==================== Scripted Handler ====================

/// Handler callback, as recorded by [`ScriptedHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Connected,
    Disconnected,
    Error(Error),
    Execute,
    Response(String),
    CommandTimeout,
}

/// Handler that hands out a fixed list of commands.
#[derive(Debug)]
pub struct ScriptedHandler {
    uri: String,
    commands: VecDeque<Command>,
    steps: Vec<Step>,
    responses: usize,
    done_after: usize,
    close_on_timeout: bool,
}

impl ScriptedHandler {
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            uri: crate::config::DEFAULT_ENDPOINT.to_string(),
            commands: commands.into(),
            steps: Vec::new(),
            responses: 0,
            done_after: usize::MAX,
            close_on_timeout: true,
        }
    }

    pub fn with_uri(mut self, uri: &str) -> Self {
        self.uri = uri.to_string();
        self
    }

    /// Report done on the `n`th response.
    pub fn done_after(mut self, n: usize) -> Self {
        self.done_after = n;
        self
    }

    pub fn keep_on_timeout(mut self) -> Self {
        self.close_on_timeout = false;
        self
    }

    pub fn steps(&self) -> Vec<Step> {
        self.steps.clone()
    }
}

impl SessionHandler for ScriptedHandler {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn on_connected(&mut self, _timers: &mut Timers) {
        self.steps.push(Step::Connected);
    }

    fn on_disconnected(&mut self, _timers: &mut Timers) {
        self.steps.push(Step::Disconnected);
    }

    fn on_error(&mut self, error: Error, _timers: &mut Timers) {
        self.steps.push(Step::Error(error));
    }

    fn on_execute_command(&mut self, _timers: &mut Timers) -> Option<Command> {
        self.steps.push(Step::Execute);
        self.commands.pop_front()
    }

    fn on_command_response(&mut self, response: &str, _timers: &mut Timers) -> bool {
        self.steps.push(Step::Response(response.to_string()));
        self.responses += 1;
        self.responses >= self.done_after
    }

    fn on_command_timeout(&mut self, _timers: &mut Timers) -> bool {
        self.steps.push(Step::CommandTimeout);
        self.close_on_timeout
    }
}
