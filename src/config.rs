//! Service configuration.
//!
//! Worker accounts and proxies come from files; everything else from
//! environment variables with sensible defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::scheduler::WorkerSettings;
use crate::session::{Credentials, Proxy, SessionOptions};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable or file line has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration for an [`InspectService`](crate::service::InspectService).
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// One worker is started per account.
    pub accounts: Vec<Credentials>,
    /// Assigned to workers round-robin.
    pub proxies: Vec<Proxy>,
    /// Attempts per job before it fails.
    pub max_attempts: u32,
    /// Minimum spacing between requests on one worker.
    pub request_delay: Duration,
    /// How long to wait for the coordinator before failing a request.
    pub request_ttl: Duration,
    /// Maximum queue depth. Zero or negative disables the limit.
    pub max_queue_size: i64,
    /// Where sessions may persist data.
    pub data_dir: Option<PathBuf>,
    /// PostgreSQL URL of the item cache.
    pub database_url: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            proxies: Vec::new(),
            max_attempts: 3,
            request_delay: Duration::from_millis(1100),
            request_ttl: Duration::from_millis(2000),
            max_queue_size: -1,
            data_dir: None,
            database_url: None,
        }
    }
}

impl ServiceConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `INSPECT_ACCOUNTS_FILE`: `username:password[:auth]` lines (default: accounts.txt)
    /// - `INSPECT_PROXIES_FILE`: proxy lines (optional)
    /// - `INSPECT_MAX_ATTEMPTS`: attempts per job (default: 3)
    /// - `INSPECT_REQUEST_DELAY_MS`: per-worker request spacing (default: 1100)
    /// - `INSPECT_REQUEST_TTL_MS`: request timeout (default: 2000)
    /// - `INSPECT_MAX_QUEUE_SIZE`: maximum queue depth, <= 0 disables (default: -1)
    /// - `INSPECT_DATA_DIR`: session data directory (optional)
    /// - `DATABASE_URL`: PostgreSQL connection URL (optional)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a file cannot be read or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `var`.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let accounts_file = var("INSPECT_ACCOUNTS_FILE").unwrap_or_else(|| "accounts.txt".to_string());
        config.accounts = load_accounts(&accounts_file)?;

        if let Some(path) = var("INSPECT_PROXIES_FILE") {
            config.proxies = load_proxies(&path)?;
        }

        if let Some(val) = var("INSPECT_MAX_ATTEMPTS") {
            config.max_attempts = parse_env_value(&val, "INSPECT_MAX_ATTEMPTS")?;
        }

        if let Some(val) = var("INSPECT_REQUEST_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "INSPECT_REQUEST_DELAY_MS")?;
            config.request_delay = Duration::from_millis(ms);
        }

        if let Some(val) = var("INSPECT_REQUEST_TTL_MS") {
            let ms: u64 = parse_env_value(&val, "INSPECT_REQUEST_TTL_MS")?;
            config.request_ttl = Duration::from_millis(ms);
        }

        if let Some(val) = var("INSPECT_MAX_QUEUE_SIZE") {
            config.max_queue_size = parse_env_value(&val, "INSPECT_MAX_QUEUE_SIZE")?;
        }

        config.data_dir = var("INSPECT_DATA_DIR").map(PathBuf::from);
        config.database_url = var("DATABASE_URL").filter(|url| !url.is_empty());

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accounts.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "at least one account is required".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.request_ttl.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "request_ttl must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The queue depth limit, if enabled.
    pub fn queue_limit(&self) -> Option<usize> {
        usize::try_from(self.max_queue_size).ok().filter(|n| *n > 0)
    }

    /// Proxy for the worker at `index`, rotating through the list.
    pub fn proxy_for(&self, index: usize) -> Option<&Proxy> {
        if self.proxies.is_empty() {
            return None;
        }
        self.proxies.get(index % self.proxies.len())
    }

    /// Session options for the worker at `index`.
    pub fn session_options(&self, index: usize) -> SessionOptions {
        SessionOptions {
            proxy: self.proxy_for(index).cloned(),
            data_dir: self.data_dir.clone(),
        }
    }

    /// Worker timing derived from this configuration.
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings::default()
            .with_request_delay(self.request_delay)
            .with_request_ttl(self.request_ttl)
    }

    /// Builder method to set accounts.
    pub fn with_accounts(mut self, accounts: Vec<Credentials>) -> Self {
        self.accounts = accounts;
        self
    }

    /// Builder method to add one account.
    pub fn with_account(mut self, account: Credentials) -> Self {
        self.accounts.push(account);
        self
    }

    /// Builder method to set proxies.
    pub fn with_proxies(mut self, proxies: Vec<Proxy>) -> Self {
        self.proxies = proxies;
        self
    }

    /// Builder method to set max attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Builder method to set the request delay.
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    /// Builder method to set the request TTL.
    pub fn with_request_ttl(mut self, ttl: Duration) -> Self {
        self.request_ttl = ttl;
        self
    }

    /// Builder method to set the max queue size.
    pub fn with_max_queue_size(mut self, size: i64) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Builder method to set the session data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }
}

/// Parses `username:password[:auth]` lines. Blank lines are skipped.
pub fn parse_accounts(content: &str) -> Result<Vec<Credentials>, ConfigError> {
    content
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .map(|(idx, line)| {
            let mut parts = line.splitn(3, ':');
            let username = parts.next().unwrap_or_default();
            let password = parts.next().unwrap_or_default();
            if username.is_empty() || password.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: format!("accounts line {}", idx + 1),
                    message: "expected username:password[:auth]".to_string(),
                });
            }

            let credentials = Credentials::new(username, password);
            Ok(match parts.next().filter(|auth| !auth.is_empty()) {
                Some(auth) => credentials.with_auth(auth),
                None => credentials,
            })
        })
        .collect()
}

/// Parses proxy lines: full `http://`/`socks5://` URLs or the
/// `address:port:username:password` shorthand. Blank lines are skipped.
pub fn parse_proxies(content: &str) -> Result<Vec<Proxy>, ConfigError> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if line.contains("://") {
                return line.parse();
            }
            Proxy::from_shorthand(line).ok_or_else(|| ConfigError::InvalidValue {
                key: "proxy".to_string(),
                message: format!("'{}' is not a URL or address:port:username:password", line),
            })
        })
        .collect()
}

/// Reads and parses an accounts file.
pub fn load_accounts(path: impl AsRef<Path>) -> Result<Vec<Credentials>, ConfigError> {
    parse_accounts(&read_file(path.as_ref())?)
}

/// Reads and parses a proxies file.
pub fn load_proxies(path: impl AsRef<Path>) -> Result<Vec<Proxy>, ConfigError> {
    parse_proxies(&read_file(path.as_ref())?)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
