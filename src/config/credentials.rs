//! Access point credentials.
//!
//! Platform-independent validation of the SSID/password pair handed to the
//! association controller. Validation happens before any radio call, so a bad
//! pair never changes controller state.
//!
//! # Example
//!
//! ```
//! use ap_session::config::{ConfigError, Credentials};
//!
//! let creds = Credentials::new("HomeNet", "password1").unwrap();
//! assert_eq!(creds.quoted_ssid(), "\"HomeNet\"");
//!
//! assert!(matches!(
//!     Credentials::new("HomeNet", "abc"),
//!     Err(ConfigError::PasswordTooShort { len: 3, min: 6 })
//! ));
//! ```

use std::fmt;
use zeroize::Zeroizing;

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 6;

/// SSID/password pair for one association attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    ssid: String,
    password: Zeroizing<String>,
}

impl Credentials {
    /// Create validated credentials.
    ///
    /// Fails if the SSID is empty or the password is shorter than
    /// [`MIN_PASSWORD_LEN`] characters.
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Result<Self, ConfigError> {
        let creds = Self {
            ssid: ssid.into(),
            password: Zeroizing::new(password.into()),
        };
        creds.validate()?;
        Ok(creds)
    }

    /// Validate the pair.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssid.is_empty() {
            return Err(ConfigError::SsidEmpty);
        }
        let len = self.password.chars().count();
        if len < MIN_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooShort {
                len,
                min: MIN_PASSWORD_LEN,
            });
        }
        Ok(())
    }

    /// Target SSID.
    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// Pre-shared key.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// SSID in the quoted form the host stack reports for a bound network.
    pub fn quoted_ssid(&self) -> String {
        quote_ssid(&self.ssid)
    }

    /// Compare against an SSID reported by the host stack for the bound
    /// network (which is quoted).
    pub fn matches_bound_ssid(&self, reported: &str) -> bool {
        self.quoted_ssid() == reported
    }
}

/// Wrap an SSID in double quotes unless it already is.
pub fn quote_ssid(ssid: &str) -> String {
    if ssid.len() >= 2 && ssid.starts_with('"') && ssid.ends_with('"') {
        ssid.to_string()
    } else {
        format!("\"{}\"", ssid)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"****")
            .finish()
    }
}

/// Errors raised while validating credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// SSID is empty.
    SsidEmpty,
    /// Password is too short.
    PasswordTooShort { len: usize, min: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::PasswordTooShort { len, min } => {
                write!(f, "password too short: {} characters (min {})", len, min)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
