//! Session client contract and events.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::item::ItemInfo;

use super::credentials::{LogOnDetails, SessionOptions};

/// App whose coordinator answers inspect calls.
pub const REQUIRED_APP_ID: u32 = 730;

/// A failure reported by the session transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SessionFailure {
    pub message: String,
    /// Result code attached by the remote service, if any.
    pub eresult: Option<u32>,
}

impl SessionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            eresult: None,
        }
    }

    pub fn with_eresult(mut self, eresult: u32) -> Self {
        self.eresult = Some(eresult);
        self
    }

    /// Human-readable reason for known login denials.
    pub fn login_denial_reason(&self) -> Option<&'static str> {
        match self.eresult? {
            61 => Some("Invalid Password"),
            63 => Some(
                "Account login denied due to 2nd factor authentication failure. \
                 If using email auth, an email has been sent.",
            ),
            65 => Some("Account login denied due to auth code being invalid"),
            66 => Some("Account login denied due to 2nd factor auth failure and no mail has been sent"),
            _ => None,
        }
    }

    /// Whether the failure came from the proxy rather than the account.
    ///
    /// The transport only reports these as text.
    pub fn is_proxy_failure(&self) -> bool {
        self.message.contains("Proxy connection timed out") || self.message.contains("Socks5")
    }
}

/// Something that happened to a session, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session hit an error, usually while logging in.
    Error(SessionFailure),
    /// The base session dropped; the transport reconnects on its own.
    Disconnected { eresult: Option<u32>, message: String },
    /// Log-on succeeded.
    LoggedOn,
    /// App ownership data is now available to [`SessionClient::owns_app`].
    OwnershipCached,
    /// The coordinator link is up; inspect calls may be issued.
    CoordinatorConnected,
    /// The coordinator link went down.
    CoordinatorDisconnected { reason: String },
    /// Attributes for an inspected asset.
    ItemInfo(ItemInfo),
}

/// Calls a worker makes on its session.
///
/// Every call except [`request_free_license`](Self::request_free_license)
/// is fire-and-forget: outcomes arrive later as [`SessionEvent`]s.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Starts authenticating with the given details.
    fn log_on(&self, details: LogOnDetails);

    /// Drops the current session, if any.
    fn log_off(&self);

    /// Forces a fresh login on the existing session.
    fn relog(&self);

    /// Whether the coordinator link is currently live.
    fn has_coordinator_link(&self) -> bool;

    /// Whether the account owns `app_id`. Valid after `OwnershipCached`.
    fn owns_app(&self, app_id: u32) -> bool;

    /// Requests a free license for the given apps.
    async fn request_free_license(&self, app_ids: &[u32]) -> Result<(), SessionFailure>;

    /// Sets the apps reported as running. Launching the required app opens
    /// the coordinator link; an empty list closes it.
    fn set_games_played(&self, app_ids: &[u32]);

    /// Sends an inspect call. The answer arrives as `SessionEvent::ItemInfo`.
    fn request_inspect(&self, owner_id: u64, asset_id: u64, auth_token: u64);
}

/// Creates sessions for new workers.
pub trait SessionFactory: Send + Sync {
    /// Creates an unauthenticated session and the stream of its events.
    fn create(
        &self,
        options: &SessionOptions,
    ) -> (Arc<dyn SessionClient>, mpsc::UnboundedReceiver<SessionEvent>);
}
