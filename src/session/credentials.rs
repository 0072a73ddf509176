//! Account credentials, proxies and log-on details.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::ConfigError;

use super::totp::{self, TotpError};

/// Auth values at most this long are sent as a code, not used as a secret.
const MAX_DIRECT_CODE_LEN: usize = 5;

/// Credentials for one worker account.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Either a one-time code or a shared secret to derive one from.
    pub auth: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    /// Builds log-on details using the current time for derived codes.
    pub fn log_on_details(&self) -> Result<LogOnDetails, TotpError> {
        self.log_on_details_at(totp::unix_now())
    }

    /// Builds log-on details, deriving any one-time code at `unix_time`.
    pub fn log_on_details_at(&self, unix_time: u64) -> Result<LogOnDetails, TotpError> {
        let second_factor = match self.auth.as_deref().filter(|auth| !auth.is_empty()) {
            None => None,
            Some(code) if code.len() <= MAX_DIRECT_CODE_LEN => {
                Some(SecondFactor::AuthCode(code.to_string()))
            }
            Some(secret) => Some(SecondFactor::TwoFactorCode(totp::auth_code(
                secret, unix_time,
            )?)),
        };

        Ok(LogOnDetails {
            second_factor,
            ..self.password_details()
        })
    }

    /// Log-on details without any second factor.
    pub fn password_details(&self) -> LogOnDetails {
        LogOnDetails {
            account_name: self.username.clone(),
            password: self.password.clone(),
            remember_password: true,
            second_factor: None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Second authentication factor sent with a log-on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecondFactor {
    /// A code supplied directly (e.g. from email).
    AuthCode(String),
    /// A code derived from the account's shared secret.
    TwoFactorCode(String),
}

/// Everything a session needs to authenticate.
#[derive(Clone, PartialEq, Eq)]
pub struct LogOnDetails {
    pub account_name: String,
    pub password: String,
    pub remember_password: bool,
    pub second_factor: Option<SecondFactor>,
}

impl fmt::Debug for LogOnDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogOnDetails")
            .field("account_name", &self.account_name)
            .field("password", &"<redacted>")
            .field("remember_password", &self.remember_password)
            .field("second_factor", &self.second_factor.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Proxy a session connects through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proxy {
    Http(String),
    Socks5(String),
}

impl Proxy {
    /// Full proxy URL.
    pub fn url(&self) -> &str {
        match self {
            Proxy::Http(url) | Proxy::Socks5(url) => url,
        }
    }

    /// Parses the `address:port:username:password` shorthand into a SOCKS5
    /// proxy.
    pub fn from_shorthand(line: &str) -> Option<Self> {
        let mut parts = line.splitn(4, ':');
        let address = parts.next().filter(|s| !s.is_empty())?;
        let port = parts.next().filter(|s| !s.is_empty())?;
        let username = parts.next()?;
        let password = parts.next()?;
        Some(Proxy::Socks5(format!(
            "socks5://{username}:{password}@{address}:{port}"
        )))
    }
}

impl FromStr for Proxy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("http://") {
            Ok(Proxy::Http(s.to_string()))
        } else if s.starts_with("socks5://") {
            Ok(Proxy::Socks5(s.to_string()))
        } else {
            Err(ConfigError::InvalidValue {
                key: "proxy".to_string(),
                message: format!("'{}' must start with http:// or socks5://", s),
            })
        }
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url())
    }
}

/// Per-session transport options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub proxy: Option<Proxy>,
    /// Directory where the transport may persist session data.
    pub data_dir: Option<PathBuf>,
}
