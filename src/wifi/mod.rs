//! WiFi association.
//!
//! # Components
//!
//! - [`radio`] - radio capability trait and the events it produces
//! - [`controller`] - association state machine (scan, associate, confirm)
//! - [`host`] - NetworkManager-backed radio for Linux hosts
//!
//! Credential validation lives in [`crate::config`].

pub mod controller;
pub mod host;
pub mod radio;

pub use controller::{
    AssociationController, AssociationEvent, AssociationListener, AssociationState,
};
pub use host::NmcliRadio;
pub use radio::{
    ConnectionInfo, DetailedState, NetworkKind, NetworkState, Radio, RadioError, RadioEvent,
    ScanEntry, Subscription,
};
