//! Session handler contract.
//!
//! The [`SessionEngine`](super::SessionEngine) owns the socket and calls back
//! into a [`SessionHandler`] for every step of the conversation. Handlers
//! never touch the socket themselves; they return [`Command`]s and decide
//! when a response completes the exchange.

use crate::error::{Error, TimeoutKind};
use crate::scheduler::Timers;
use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedSender;

/// One text command sent over the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub payload: String,
    /// Close the socket shortly after sending instead of waiting for a reply.
    pub close_after_send: bool,
}

impl Command {
    /// Command whose reply is not needed. The socket closes after a short
    /// grace period.
    pub fn write_only(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            close_after_send: true,
        }
    }

    /// Command that expects a reply.
    pub fn read(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            close_after_send: false,
        }
    }
}

/// Callbacks invoked by the session engine.
///
/// Every engine run ends with exactly one of [`on_disconnected`] or
/// [`on_error`].
///
/// [`on_disconnected`]: SessionHandler::on_disconnected
/// [`on_error`]: SessionHandler::on_error
pub trait SessionHandler {
    /// Endpoint to connect to.
    fn uri(&self) -> &str;

    /// Socket opened.
    fn on_connected(&mut self, timers: &mut Timers);

    /// Socket closed, by either side.
    fn on_disconnected(&mut self, timers: &mut Timers);

    /// Connect or transport failure.
    fn on_error(&mut self, error: Error, timers: &mut Timers);

    /// Next command to send, or `None` if there is nothing more to say on
    /// this connection.
    fn on_execute_command(&mut self, timers: &mut Timers) -> Option<Command>;

    /// Reply to the pending command. Return `true` when the exchange is done
    /// and the socket should close.
    fn on_command_response(&mut self, response: &str, timers: &mut Timers) -> bool;

    /// The pending command got no reply in time. Return `true` to close.
    fn on_command_timeout(&mut self, _timers: &mut Timers) -> bool {
        true
    }

    /// Whether the handler wants another engine run on its next poll tick.
    fn wants_more_cycles(&self) -> bool {
        false
    }
}

/// Receives the single outcome of a session.
pub trait ResultListener {
    fn on_result(&mut self, response: String);
    fn on_error(&mut self, error: Error);
}

/// [`ResultListener`] callbacks as values, for channel-based consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Result(String),
    Error(Error),
}

impl ResultListener for UnboundedSender<SessionOutcome> {
    fn on_result(&mut self, response: String) {
        let _ = self.send(SessionOutcome::Result(response));
    }

    fn on_error(&mut self, error: Error) {
        let _ = self.send(SessionOutcome::Error(error));
    }
}

/// Sends one read command and reports its reply.
pub struct SingleCommand<L> {
    uri: String,
    payload: String,
    listener: L,
    sent: bool,
    reported: bool,
}

impl<L: ResultListener> SingleCommand<L> {
    pub fn new(uri: impl Into<String>, payload: impl Into<String>, listener: L) -> Self {
        Self {
            uri: uri.into(),
            payload: payload.into(),
            listener,
            sent: false,
            reported: false,
        }
    }

    fn report(&mut self, outcome: Result<String, Error>) {
        if self.reported {
            return;
        }
        self.reported = true;
        match outcome {
            Ok(response) => self.listener.on_result(response),
            Err(e) => {
                warn!("'{}' failed: {}", self.payload, e);
                self.listener.on_error(e);
            }
        }
    }
}

impl<L: ResultListener> SessionHandler for SingleCommand<L> {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn on_connected(&mut self, _timers: &mut Timers) {
        debug!("Connected, sending '{}'", self.payload);
    }

    fn on_disconnected(&mut self, _timers: &mut Timers) {
        if !self.reported {
            self.report(Err(Error::Network("closed before a reply arrived".into())));
        }
    }

    fn on_error(&mut self, error: Error, _timers: &mut Timers) {
        self.report(Err(error));
    }

    fn on_execute_command(&mut self, _timers: &mut Timers) -> Option<Command> {
        if self.sent {
            return None;
        }
        self.sent = true;
        Some(Command::read(self.payload.clone()))
    }

    fn on_command_response(&mut self, response: &str, _timers: &mut Timers) -> bool {
        info!("'{}' answered ({} bytes)", self.payload, response.len());
        self.report(Ok(response.to_string()));
        true
    }

    fn on_command_timeout(&mut self, _timers: &mut Timers) -> bool {
        self.report(Err(Error::Timeout(TimeoutKind::Command)));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EventLog;

    fn single() -> (SingleCommand<EventLog<SessionOutcome>>, EventLog<SessionOutcome>) {
        let log = EventLog::new();
        (
            SingleCommand::new("ws://192.168.4.1/web.cgi", "wifi_st_sta", log.clone()),
            log,
        )
    }

    #[test]
    fn test_command_constructors() {
        assert!(Command::write_only("wifi_scan=1").close_after_send);
        assert!(!Command::read("wifi_scan").close_after_send);
    }

    #[test]
    fn test_single_command_sends_once() {
        let (mut h, _) = single();
        let mut timers = Timers::new();
        assert_eq!(
            h.on_execute_command(&mut timers),
            Some(Command::read("wifi_st_sta"))
        );
        assert_eq!(h.on_execute_command(&mut timers), None);
        assert!(!h.wants_more_cycles());
    }

    #[test]
    fn test_single_command_reports_reply() {
        let (mut h, log) = single();
        let mut timers = Timers::new();
        h.on_execute_command(&mut timers);
        assert!(h.on_command_response("<sta>up</sta>", &mut timers));
        h.on_disconnected(&mut timers);
        assert_eq!(
            log.events(),
            vec![SessionOutcome::Result("<sta>up</sta>".into())]
        );
    }

    #[test]
    fn test_single_command_closed_early() {
        let (mut h, log) = single();
        let mut timers = Timers::new();
        h.on_disconnected(&mut timers);
        assert!(matches!(
            log.events().as_slice(),
            [SessionOutcome::Error(Error::Network(_))]
        ));
    }

    #[test]
    fn test_single_command_timeout_reported_once() {
        let (mut h, log) = single();
        let mut timers = Timers::new();
        assert!(h.on_command_timeout(&mut timers));
        h.on_disconnected(&mut timers);
        assert_eq!(
            log.events(),
            vec![SessionOutcome::Error(Error::Timeout(TimeoutKind::Command))]
        );
    }
}
