//! Session engine.
//!
//! One engine drives one socket connection from open to close:
//!
//! ```text
//! None ──run──▶ Connecting ──Opened──▶ Connected ──send──▶ WaitingResponse
//!                   │                      ▲                    │
//!                   │                      └──── not done ◀─────┤ Message
//!                   ▼                                           ▼
//!                Closed ◀──────── close / error / timeout ──────┘
//! ```
//!
//! Engines are single-use. After [`SessionState::Closed`] every event is
//! ignored and the owner drops the instance; a new run gets a new engine.
//! The handler is passed in on every call so the owner can keep it across
//! runs.

use super::handler::{Command, SessionHandler};
use super::SessionId;
use crate::config::SessionSettings;
use crate::error::Error;
use crate::scheduler::{Task, TimerId, Timers};
use log::{debug, info, warn};
use std::time::Duration;

/// Transport notifications for one socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Opened,
    Message(String),
    Closed { by_server: bool },
    ConnectError(String),
    Error(String),
}

/// Outgoing side of an open (or opening) socket.
pub trait Socket {
    /// Queue a text frame. Returns false if the socket is gone.
    fn send_text(&mut self, text: &str) -> bool;

    /// Close the socket. No further events are needed after this call.
    fn disconnect(&mut self);
}

/// Opens sockets. The outcome of the open arrives as a [`SocketEvent`]
/// tagged with the session id.
pub trait Connector {
    type Socket: Socket;

    /// Start connecting to `uri`. Fails synchronously only for a bad URI.
    fn connect(
        &mut self,
        id: SessionId,
        uri: &str,
        timeout: Duration,
    ) -> Result<Self::Socket, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    None,
    Connecting,
    Connected,
    WaitingResponse,
    Closed,
}

/// Single-use driver for one socket connection.
pub struct SessionEngine<S> {
    id: SessionId,
    state: SessionState,
    socket: Option<S>,
    settings: SessionSettings,
    close_timer: Option<TimerId>,
    command_timer: Option<TimerId>,
}

impl<S: Socket> SessionEngine<S> {
    /// Open a socket to `handler.uri()`.
    ///
    /// A URI the connector rejects is reported through `handler.on_error`
    /// before this returns, and the engine comes back already closed.
    pub fn run<C>(
        id: SessionId,
        connector: &mut C,
        handler: &mut dyn SessionHandler,
        timers: &mut Timers,
        settings: SessionSettings,
    ) -> Self
    where
        C: Connector<Socket = S>,
    {
        let mut engine = Self {
            id,
            state: SessionState::None,
            socket: None,
            settings,
            close_timer: None,
            command_timer: None,
        };
        debug!("{}: connecting to {}", id, handler.uri());
        match connector.connect(id, handler.uri(), engine.settings.connect_timeout()) {
            Ok(socket) => {
                engine.socket = Some(socket);
                engine.state = SessionState::Connecting;
            }
            Err(msg) => {
                warn!("{}: cannot open {}: {}", id, handler.uri(), msg);
                engine.state = SessionState::Closed;
                handler.on_error(Error::Network(msg), timers);
            }
        }
        engine
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Feed a transport event for this engine's socket.
    pub fn handle_socket_event(
        &mut self,
        event: SocketEvent,
        handler: &mut dyn SessionHandler,
        timers: &mut Timers,
    ) {
        if self.is_closed() {
            debug!("{}: ignoring {:?} after close", self.id, event);
            return;
        }
        match event {
            SocketEvent::Opened if self.state == SessionState::Connecting => {
                info!("{}: connected", self.id);
                self.state = SessionState::Connected;
                handler.on_connected(timers);
                self.execute_next(handler, timers);
            }
            SocketEvent::Message(text) => self.on_message(text, handler, timers),
            SocketEvent::Closed { by_server } => {
                debug!("{}: closed (by server: {})", self.id, by_server);
                self.finish(None, handler, timers);
            }
            SocketEvent::ConnectError(msg) | SocketEvent::Error(msg) => {
                warn!("{}: {}", self.id, msg);
                self.finish(Some(Error::Network(msg)), handler, timers);
            }
            event => debug!("{}: unexpected {:?} in {:?}", self.id, event, self.state),
        }
    }

    /// Handle a fired engine task.
    pub fn handle_timer(
        &mut self,
        id: TimerId,
        task: Task,
        handler: &mut dyn SessionHandler,
        timers: &mut Timers,
    ) {
        if self.is_closed() {
            return;
        }
        match task {
            Task::CloseSocket(session) if session == self.id && self.close_timer == Some(id) => {
                self.close_timer = None;
                debug!("{}: closing after write-only command", self.id);
                self.close(handler, timers);
            }
            Task::CommandTimeout(session)
                if session == self.id && self.command_timer == Some(id) =>
            {
                self.command_timer = None;
                warn!("{}: no reply within {:?}", self.id, self.settings.command_timeout());
                if handler.on_command_timeout(timers) {
                    self.close(handler, timers);
                }
            }
            _ => debug!("{}: stale {:?}", self.id, task),
        }
    }

    fn on_message(&mut self, text: String, handler: &mut dyn SessionHandler, timers: &mut Timers) {
        if self.close_timer.is_some() {
            debug!("{}: ignoring reply to write-only command", self.id);
            return;
        }
        if self.state != SessionState::WaitingResponse {
            debug!("{}: unsolicited message in {:?}", self.id, self.state);
            return;
        }
        cancel(&mut self.command_timer, timers);
        debug!("{}: received {} bytes", self.id, text.len());
        self.state = SessionState::Connected;

        if handler.on_command_response(&text, timers) {
            self.close(handler, timers);
        } else {
            self.execute_next(handler, timers);
        }
    }

    /// Ask the handler for the next command and send it, or close if there
    /// is none.
    fn execute_next(&mut self, handler: &mut dyn SessionHandler, timers: &mut Timers) {
        match handler.on_execute_command(timers) {
            Some(command) => self.send(command, handler, timers),
            None => {
                debug!("{}: nothing more to send", self.id);
                self.close(handler, timers);
            }
        }
    }

    fn send(&mut self, command: Command, handler: &mut dyn SessionHandler, timers: &mut Timers) {
        let sent = self
            .socket
            .as_mut()
            .is_some_and(|socket| socket.send_text(&command.payload));
        if !sent {
            self.finish(
                Some(Error::Network(format!("failed to send '{}'", command.payload))),
                handler,
                timers,
            );
            return;
        }
        info!("{}: sent '{}'", self.id, command.payload);
        self.state = SessionState::WaitingResponse;
        if command.close_after_send {
            self.close_timer =
                Some(timers.schedule(self.settings.close_grace(), Task::CloseSocket(self.id)));
        } else {
            self.command_timer = Some(
                timers.schedule(self.settings.command_timeout(), Task::CommandTimeout(self.id)),
            );
        }
    }

    /// Close from our side.
    fn close(&mut self, handler: &mut dyn SessionHandler, timers: &mut Timers) {
        if let Some(socket) = self.socket.as_mut() {
            socket.disconnect();
        }
        self.finish(None, handler, timers);
    }

    /// Release the socket and deliver the single closing callback.
    fn finish(
        &mut self,
        error: Option<Error>,
        handler: &mut dyn SessionHandler,
        timers: &mut Timers,
    ) {
        cancel(&mut self.close_timer, timers);
        cancel(&mut self.command_timer, timers);
        self.socket = None;
        self.state = SessionState::Closed;
        match error {
            Some(e) => handler.on_error(e, timers),
            None => handler.on_disconnected(timers),
        }
    }
}

fn cancel(timer: &mut Option<TimerId>, timers: &mut Timers) {
    if let Some(id) = timer.take() {
        timers.cancel(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeConnector, FakeSocket, ScriptedHandler, Step};

    const ID: SessionId = SessionId(7);

    fn start(
        handler: &mut ScriptedHandler,
    ) -> (SessionEngine<FakeSocket>, FakeConnector, Timers) {
        let mut connector = FakeConnector::default();
        let mut timers = Timers::new();
        let engine = SessionEngine::run(
            ID,
            &mut connector,
            handler,
            &mut timers,
            SessionSettings::default(),
        );
        (engine, connector, timers)
    }

    fn advance(
        engine: &mut SessionEngine<FakeSocket>,
        handler: &mut ScriptedHandler,
        timers: &mut Timers,
        by: Duration,
    ) {
        timers.advance_by(by);
        while let Some((id, task)) = timers.pop_due() {
            engine.handle_timer(id, task, handler, timers);
        }
    }

    // ==================== Connect Tests ====================

    #[test]
    fn test_connect_uses_handler_uri_and_timeout() {
        let mut handler = ScriptedHandler::new(vec![]);
        let (engine, connector, _) = start(&mut handler);
        assert_eq!(engine.state(), SessionState::Connecting);
        assert_eq!(
            connector.opened(),
            vec![(ID, "ws://192.168.4.1/web.cgi".to_string(), Duration::from_secs(5))]
        );
        assert!(handler.steps().is_empty());
    }

    #[test]
    fn test_bad_uri_reports_error_synchronously() {
        let mut handler = ScriptedHandler::new(vec![]).with_uri("not a uri");
        let mut connector = FakeConnector::default();
        connector.reject_uri("not a uri");
        let mut timers = Timers::new();
        let engine: SessionEngine<FakeSocket> = SessionEngine::run(
            ID,
            &mut connector,
            &mut handler,
            &mut timers,
            SessionSettings::default(),
        );
        assert!(engine.is_closed());
        assert!(matches!(
            handler.steps().as_slice(),
            [Step::Error(Error::Network(_))]
        ));
    }

    #[test]
    fn test_connect_error() {
        let mut handler = ScriptedHandler::new(vec![Command::read("wifi_scan")]);
        let (mut engine, _, mut timers) = start(&mut handler);
        engine.handle_socket_event(
            SocketEvent::ConnectError("timed out".into()),
            &mut handler,
            &mut timers,
        );
        assert_eq!(
            handler.steps(),
            vec![Step::Error(Error::Network("timed out".into()))]
        );
        assert!(engine.is_closed());
    }

    // ==================== Command Tests ====================

    #[test]
    fn test_open_sends_first_command() {
        let mut handler = ScriptedHandler::new(vec![Command::read("wifi_st_sta")]);
        let (mut engine, connector, mut timers) = start(&mut handler);
        engine.handle_socket_event(SocketEvent::Opened, &mut handler, &mut timers);

        assert_eq!(handler.steps(), vec![Step::Connected, Step::Execute]);
        assert_eq!(connector.sent(), vec!["wifi_st_sta".to_string()]);
        assert_eq!(engine.state(), SessionState::WaitingResponse);
        assert_eq!(timers.next_deadline(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_write_only_closes_after_grace() {
        let mut handler = ScriptedHandler::new(vec![Command::write_only("wifi_scan=1")]);
        let (mut engine, connector, mut timers) = start(&mut handler);
        engine.handle_socket_event(SocketEvent::Opened, &mut handler, &mut timers);

        advance(&mut engine, &mut handler, &mut timers, Duration::from_millis(49));
        assert!(!engine.is_closed());

        advance(&mut engine, &mut handler, &mut timers, Duration::from_millis(1));
        assert!(engine.is_closed());
        assert!(connector.disconnected());
        assert_eq!(handler.steps().last(), Some(&Step::Disconnected));
        assert!(timers.is_empty());
    }

    #[test]
    fn test_write_only_ignores_reply() {
        let mut handler = ScriptedHandler::new(vec![Command::write_only("wifi_scan=1")]);
        let (mut engine, _, mut timers) = start(&mut handler);
        engine.handle_socket_event(SocketEvent::Opened, &mut handler, &mut timers);
        engine.handle_socket_event(
            SocketEvent::Message("<ok/>".into()),
            &mut handler,
            &mut timers,
        );
        assert!(!handler.steps().iter().any(|s| matches!(s, Step::Response(_))));

        advance(&mut engine, &mut handler, &mut timers, Duration::from_millis(50));
        assert!(engine.is_closed());
    }

    #[test]
    fn test_done_response_closes() {
        let mut handler = ScriptedHandler::new(vec![Command::read("wifi_scan")]).done_after(1);
        let (mut engine, connector, mut timers) = start(&mut handler);
        engine.handle_socket_event(SocketEvent::Opened, &mut handler, &mut timers);
        engine.handle_socket_event(
            SocketEvent::Message("<total>3</total>".into()),
            &mut handler,
            &mut timers,
        );

        assert_eq!(
            handler.steps(),
            vec![
                Step::Connected,
                Step::Execute,
                Step::Response("<total>3</total>".into()),
                Step::Disconnected,
            ]
        );
        assert!(connector.disconnected());
        assert!(timers.is_empty());
    }

    #[test]
    fn test_not_done_sends_next_command_on_same_socket() {
        let mut handler = ScriptedHandler::new(vec![Command::read("a"), Command::read("b")])
            .done_after(2);
        let (mut engine, connector, mut timers) = start(&mut handler);
        engine.handle_socket_event(SocketEvent::Opened, &mut handler, &mut timers);
        engine.handle_socket_event(SocketEvent::Message("1".into()), &mut handler, &mut timers);

        assert_eq!(connector.sent(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(connector.opened().len(), 1);
        assert_eq!(engine.state(), SessionState::WaitingResponse);

        engine.handle_socket_event(SocketEvent::Message("2".into()), &mut handler, &mut timers);
        assert!(engine.is_closed());
    }

    #[test]
    fn test_no_further_command_closes() {
        let mut handler = ScriptedHandler::new(vec![Command::read("wifi_scan")]);
        let (mut engine, _, mut timers) = start(&mut handler);
        engine.handle_socket_event(SocketEvent::Opened, &mut handler, &mut timers);
        engine.handle_socket_event(
            SocketEvent::Message("<total>0</total>".into()),
            &mut handler,
            &mut timers,
        );
        assert!(engine.is_closed());
        assert_eq!(handler.steps().last(), Some(&Step::Disconnected));
    }

    // ==================== Timeout Tests ====================

    #[test]
    fn test_command_timeout_closes() {
        let mut handler = ScriptedHandler::new(vec![Command::read("wifi_scan")]);
        let (mut engine, _, mut timers) = start(&mut handler);
        engine.handle_socket_event(SocketEvent::Opened, &mut handler, &mut timers);

        advance(&mut engine, &mut handler, &mut timers, Duration::from_millis(1000));
        assert_eq!(
            &handler.steps()[2..],
            &[Step::CommandTimeout, Step::Disconnected]
        );
        assert!(engine.is_closed());
    }

    #[test]
    fn test_command_timeout_can_keep_waiting() {
        let mut handler =
            ScriptedHandler::new(vec![Command::read("wifi_scan")]).keep_on_timeout();
        let (mut engine, _, mut timers) = start(&mut handler);
        engine.handle_socket_event(SocketEvent::Opened, &mut handler, &mut timers);
        advance(&mut engine, &mut handler, &mut timers, Duration::from_secs(2));
        assert!(!engine.is_closed());
        assert_eq!(handler.steps().last(), Some(&Step::CommandTimeout));
    }

    #[test]
    fn test_response_cancels_command_timer() {
        let mut handler = ScriptedHandler::new(vec![Command::read("wifi_scan")]).done_after(1);
        let (mut engine, _, mut timers) = start(&mut handler);
        engine.handle_socket_event(SocketEvent::Opened, &mut handler, &mut timers);
        engine.handle_socket_event(SocketEvent::Message("x".into()), &mut handler, &mut timers);
        advance(&mut engine, &mut handler, &mut timers, Duration::from_secs(5));
        assert!(!handler.steps().contains(&Step::CommandTimeout));
    }

    // ==================== Close Tests ====================

    #[test]
    fn test_server_close_reports_disconnected_once() {
        let mut handler = ScriptedHandler::new(vec![Command::read("wifi_scan")]);
        let (mut engine, _, mut timers) = start(&mut handler);
        engine.handle_socket_event(SocketEvent::Opened, &mut handler, &mut timers);
        engine.handle_socket_event(
            SocketEvent::Closed { by_server: true },
            &mut handler,
            &mut timers,
        );
        engine.handle_socket_event(
            SocketEvent::Closed { by_server: false },
            &mut handler,
            &mut timers,
        );
        engine.handle_socket_event(SocketEvent::Error("late".into()), &mut handler, &mut timers);

        let closing = handler
            .steps()
            .iter()
            .filter(|s| matches!(s, Step::Disconnected | Step::Error(_)))
            .count();
        assert_eq!(closing, 1);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_transport_error_after_send() {
        let mut handler = ScriptedHandler::new(vec![Command::read("wifi_scan")]);
        let (mut engine, _, mut timers) = start(&mut handler);
        engine.handle_socket_event(SocketEvent::Opened, &mut handler, &mut timers);
        engine.handle_socket_event(
            SocketEvent::Error("reset".into()),
            &mut handler,
            &mut timers,
        );
        assert_eq!(
            handler.steps().last(),
            Some(&Step::Error(Error::Network("reset".into())))
        );
        assert!(timers.is_empty());
    }

    #[test]
    fn test_send_failure_is_error() {
        let mut handler = ScriptedHandler::new(vec![Command::read("wifi_scan")]);
        let (mut engine, connector, mut timers) = start(&mut handler);
        connector.fail_sends();
        engine.handle_socket_event(SocketEvent::Opened, &mut handler, &mut timers);
        assert!(engine.is_closed());
        assert!(matches!(
            handler.steps().last(),
            Some(Step::Error(Error::Network(_)))
        ));
    }
}
