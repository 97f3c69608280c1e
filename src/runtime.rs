//! Single-threaded event loop.
//!
//! [`EventLoop`] is the only dispatcher in the crate. It owns the shared
//! [`Timers`], the association controller and the current session, and feeds
//! them radio events, socket events and due tasks one at a time. Nothing
//! re-enters a state machine: a poll tick only marks that a new engine run is
//! wanted, and the loop starts it.
//!
//! Typical use from a `current_thread` runtime:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = shutdown.cancelled() => break,
//!         _ = event_loop.step() => {}
//!     }
//!     while let Ok(event) = association_rx.try_recv() {
//!         // react to listener callbacks
//!     }
//! }
//! ```

use crate::config::SessionSettings;
use crate::error::Error;
use crate::scheduler::{Task, TimerId, Timers};
use crate::session::{Connector, SessionEngine, SessionHandler, SessionId, SocketEvent};
use crate::wifi::{AssociationController, AssociationListener, Radio, RadioEvent};
use log::{debug, info};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

/// Event loop driving one association controller and at most one session.
pub struct EventLoop<R, C: Connector> {
    timers: Timers,
    epoch: Instant,
    controller: AssociationController<R>,
    radio_events: UnboundedReceiver<RadioEvent>,
    connector: C,
    socket_events: UnboundedReceiver<(SessionId, SocketEvent)>,
    session_settings: SessionSettings,
    engine: Option<SessionEngine<C::Socket>>,
    handler: Option<Box<dyn SessionHandler>>,
    next_session: u64,
}

impl<R: Radio, C: Connector> EventLoop<R, C> {
    pub fn new(
        controller: AssociationController<R>,
        radio_events: UnboundedReceiver<RadioEvent>,
        connector: C,
        socket_events: UnboundedReceiver<(SessionId, SocketEvent)>,
        session_settings: SessionSettings,
    ) -> Self {
        Self {
            timers: Timers::new(),
            epoch: Instant::now(),
            controller,
            radio_events,
            connector,
            socket_events,
            session_settings,
            engine: None,
            handler: None,
            next_session: 0,
        }
    }

    pub fn controller(&self) -> &AssociationController<R> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut AssociationController<R> {
        &mut self.controller
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    /// Start an association attempt. See [`AssociationController::connect`].
    pub fn connect<L>(&mut self, ssid: &str, password: &str, listener: L) -> Result<(), Error>
    where
        L: AssociationListener + 'static,
    {
        self.sync_clock();
        self.controller
            .connect(ssid, password, listener, &mut self.timers)
    }

    /// Abandon the in-flight association attempt, if any, without callbacks.
    pub fn cancel_association(&mut self) -> bool {
        self.controller.cancel(&mut self.timers)
    }

    /// Start a session and its first engine run.
    ///
    /// Fails with [`Error::Busy`] while another session is active.
    pub fn start_session<H>(&mut self, handler: H) -> Result<(), Error>
    where
        H: SessionHandler + 'static,
    {
        if self.handler.is_some() {
            return Err(Error::Busy);
        }
        self.sync_clock();
        info!("Starting session against {}", handler.uri());
        self.handler = Some(Box::new(handler));
        self.start_run();
        Ok(())
    }

    /// True while a session handler is installed.
    pub fn has_session(&self) -> bool {
        self.handler.is_some()
    }

    /// Engine run currently owning the socket.
    pub fn current_run(&self) -> Option<SessionId> {
        self.engine.as_ref().map(SessionEngine::id)
    }

    /// Wait for the next radio event, socket event or due task and dispatch
    /// it. Cancel-safe.
    pub async fn step(&mut self) {
        let deadline = self.timers.next_deadline().map(|at| self.epoch + at);
        tokio::select! {
            Some(event) = self.radio_events.recv() => {
                self.sync_clock();
                self.controller.handle_event(event, &mut self.timers);
            }
            Some((id, event)) = self.socket_events.recv() => {
                self.sync_clock();
                self.dispatch_socket_event(id, event);
            }
            _ = sleep_until(deadline) => self.sync_clock(),
        }
        self.run_due();
    }

    fn sync_clock(&mut self) {
        let elapsed: Duration = Instant::now().saturating_duration_since(self.epoch);
        self.timers.advance_to(elapsed);
    }

    fn run_due(&mut self) {
        while let Some((id, task)) = self.timers.pop_due() {
            match task {
                Task::SetupTimeout | Task::ConnectedGrace => {
                    self.controller.handle_timer(id, task, &mut self.timers)
                }
                Task::CloseSocket(_) | Task::CommandTimeout(_) => {
                    if let (Some(engine), Some(handler)) =
                        (self.engine.as_mut(), self.handler.as_deref_mut())
                    {
                        engine.handle_timer(id, task, handler, &mut self.timers);
                    }
                    self.reap();
                }
                Task::PollTick => self.on_poll_tick(id),
            }
        }
    }

    fn on_poll_tick(&mut self, id: TimerId) {
        let wants_more = self
            .handler
            .as_ref()
            .is_some_and(|handler| handler.wants_more_cycles());
        if !wants_more {
            debug!("Dropping poll tick with no polling session");
            self.timers.cancel(id);
        } else if let Some(run) = self.current_run() {
            debug!("Poll tick skipped, {} still active", run);
        } else {
            self.start_run();
        }
    }

    fn dispatch_socket_event(&mut self, id: SessionId, event: SocketEvent) {
        match (self.engine.as_mut(), self.handler.as_deref_mut()) {
            (Some(engine), Some(handler)) if engine.id() == id => {
                engine.handle_socket_event(event, handler, &mut self.timers);
            }
            _ => debug!("Ignoring {:?} for finished {}", event, id),
        }
        self.reap();
    }

    fn start_run(&mut self) {
        let Some(handler) = self.handler.as_deref_mut() else {
            return;
        };
        let id = SessionId(self.next_session);
        self.next_session += 1;
        let engine = SessionEngine::run(
            id,
            &mut self.connector,
            handler,
            &mut self.timers,
            self.session_settings.clone(),
        );
        self.engine = Some(engine);
        self.reap();
    }

    /// Drop a closed engine, and the handler once it wants no more runs.
    fn reap(&mut self) {
        if self.engine.as_ref().is_some_and(SessionEngine::is_closed) {
            self.engine = None;
            let finished = self
                .handler
                .as_ref()
                .is_some_and(|handler| !handler.wants_more_cycles());
            if finished {
                info!("Session finished");
                self.handler = None;
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
