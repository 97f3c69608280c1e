//! Request/response sessions against the access point's device.
//!
//! A session is a [`SessionHandler`] driven by a single-use
//! [`SessionEngine`] per socket connection. Handlers that poll
//! ([`PollingSession`]) ask the event loop for further engine cycles.
//!
//! # Components
//!
//! - [`handler`] - handler contract, [`Command`] and the one-shot handler
//! - [`engine`] - socket lifecycle, command sends and timeouts
//! - [`poll`] - start-then-poll handler for long-running remote operations
//! - [`completion`] - completion marker extraction from XML responses
//! - [`ws`] - WebSocket transport

pub mod completion;
pub mod engine;
pub mod handler;
pub mod poll;
pub mod ws;

use std::fmt;

pub use completion::{completion_count, is_complete};
pub use engine::{Connector, SessionEngine, SessionState, Socket, SocketEvent};
pub use handler::{Command, ResultListener, SessionHandler, SessionOutcome, SingleCommand};
pub use poll::{PollState, PollingSession};
pub use ws::{WsConnector, WsSocket};

/// Identifies one engine run (one socket connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}
