//! Access point association and session library.
//!
//! Connects a client to a device's wireless access point and then talks to the
//! device over a transient WebSocket:
//!
//! - [`wifi`] - association controller (scan, associate, confirm) and radios
//! - [`session`] - session engine, polling session and WebSocket transport
//! - [`runtime`] - single-threaded event loop that drives both
//!
//! All state machines are sans-IO and share one [`scheduler::Timers`] queue,
//! so they can be tested on a virtual clock.

pub mod config;
pub mod error;
pub mod runtime;
pub mod scheduler;
pub mod session;
#[cfg(test)]
pub(crate) mod testing;
pub mod wifi;

// Re-export commonly used items
pub use config::{ConfigError, Credentials, Settings};
pub use error::{Error, TimeoutKind};
pub use runtime::EventLoop;
pub use session::{Command, PollingSession, SessionHandler, SingleCommand};
pub use wifi::{AssociationController, AssociationEvent, AssociationListener, Radio};
