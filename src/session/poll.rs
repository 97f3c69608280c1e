//! Start-then-poll session.
//!
//! The first engine run sends a write-only start command (`wifi_scan=1`) and
//! arms a repeating poll tick. Every tick afterwards opens a new connection
//! and sends one fetch command (`wifi_scan`). The first response whose
//! completion marker is positive is the result.
//!
//! ```text
//! Init ──start cmd──▶ Scanning ──tick──▶ Retrieving ──tick──▶ Retrieving ...
//!                                              │
//!                                   total > 0  ▼
//!                                        on_result (timer cancelled)
//! ```
//!
//! A connection error or command timeout starts the session over from the
//! start command, up to [`PollSettings::restarts`] times. The listener hears
//! exactly once, either `on_result` or `on_error`.

use super::completion::completion_count;
use super::handler::{Command, ResultListener, SessionHandler};
use crate::config::PollSettings;
use crate::error::{Error, TimeoutKind};
use crate::scheduler::{Task, TimerId, Timers};
use log::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Init,
    Scanning,
    Retrieving,
}

/// Polling handler.
pub struct PollingSession<L> {
    uri: String,
    settings: PollSettings,
    listener: L,
    state: PollState,
    timer: Option<TimerId>,
    /// A fetch was sent on the current connection.
    fetched: bool,
    restarts_left: u32,
    reported: bool,
}

impl<L: ResultListener> PollingSession<L> {
    pub fn new(uri: impl Into<String>, settings: PollSettings, listener: L) -> Self {
        Self {
            uri: uri.into(),
            restarts_left: settings.restarts,
            settings,
            listener,
            state: PollState::Init,
            timer: None,
            fetched: false,
            reported: false,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Poll tick handle, while polling.
    pub fn timer(&self) -> Option<TimerId> {
        self.timer
    }

    /// Start over, or report `error` once no restarts are left.
    fn fail(&mut self, error: Error, timers: &mut Timers) {
        if self.reported {
            return;
        }
        if self.restarts_left == 0 {
            self.report(Err(error), timers);
            return;
        }
        self.restarts_left -= 1;
        warn!(
            "Polling failed in {:?}: {}, starting over ({} restarts left)",
            self.state, error, self.restarts_left
        );
        if let Some(id) = self.timer.take() {
            timers.cancel(id);
        }
        // The next tick reruns the start command.
        self.timer = Some(timers.schedule_repeating(
            self.settings.period(),
            self.settings.period(),
            Task::PollTick,
        ));
        self.state = PollState::Init;
        self.fetched = false;
    }

    fn report(&mut self, outcome: Result<String, Error>, timers: &mut Timers) {
        if self.reported {
            return;
        }
        self.reported = true;
        if let Some(id) = self.timer.take() {
            timers.cancel(id);
        }
        match outcome {
            Ok(response) => {
                info!("Poll complete ({} bytes)", response.len());
                self.listener.on_result(response);
            }
            Err(e) => {
                warn!("Polling failed in {:?}: {}", self.state, e);
                self.listener.on_error(e);
            }
        }
    }
}

impl<L: ResultListener> SessionHandler for PollingSession<L> {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn on_connected(&mut self, _timers: &mut Timers) {
        self.fetched = false;
    }

    fn on_disconnected(&mut self, _timers: &mut Timers) {
        debug!("Poll connection closed in {:?}", self.state);
    }

    fn on_error(&mut self, error: Error, timers: &mut Timers) {
        self.fail(error, timers);
    }

    fn on_execute_command(&mut self, timers: &mut Timers) -> Option<Command> {
        if self.reported {
            return None;
        }
        match self.state {
            PollState::Init => {
                if let Some(id) = self.timer.take() {
                    timers.cancel(id);
                }
                self.timer = Some(timers.schedule_repeating(
                    self.settings.first(),
                    self.settings.period(),
                    Task::PollTick,
                ));
                self.state = PollState::Scanning;
                Some(Command::write_only(self.settings.start_command.clone()))
            }
            PollState::Scanning | PollState::Retrieving => {
                if self.fetched {
                    return None;
                }
                self.fetched = true;
                self.state = PollState::Retrieving;
                Some(Command::read(self.settings.fetch_command.clone()))
            }
        }
    }

    fn on_command_response(&mut self, response: &str, timers: &mut Timers) -> bool {
        if self.reported {
            return true;
        }
        match completion_count(response) {
            Ok(Some(count)) if count > 0 => {
                self.report(Ok(response.to_string()), timers);
                true
            }
            Ok(count) => {
                debug!("Not complete yet (total: {:?})", count);
                false
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    fn on_command_timeout(&mut self, timers: &mut Timers) -> bool {
        self.fail(Error::Timeout(TimeoutKind::Command), timers);
        true
    }

    fn wants_more_cycles(&self) -> bool {
        !self.reported
    }
}
