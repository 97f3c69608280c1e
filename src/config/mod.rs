//! Configuration.
//!
//! # Components
//!
//! - [`credentials`] - SSID/password validation for association attempts
//! - [`settings`] - endpoint and timing settings, optionally loaded from JSON

mod credentials;
mod settings;

pub use credentials::{quote_ssid, ConfigError, Credentials, MIN_PASSWORD_LEN};
pub use settings::{
    AssociationSettings, PollSettings, SessionSettings, Settings, SettingsError, CLOSE_GRACE_MS,
    COMMAND_TIMEOUT_MS, CONNECTED_GRACE_MS, CONNECT_TIMEOUT_MS, DEFAULT_ENDPOINT, POLL_FIRST_MS,
    POLL_PERIOD_MS, POLL_RESTARTS, SETUP_TIMEOUT_MS,
};
