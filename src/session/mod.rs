//! Seam to the remote session transport.
//!
//! The network and authentication protocol used to reach the game
//! coordinator lives outside this crate. A transport plugs in by
//! implementing [`SessionFactory`] and [`SessionClient`]; each session
//! reports what happens to it as a stream of [`SessionEvent`]s, which the
//! owning worker consumes in order.
//!
//! - **client**: the call surface and the event vocabulary
//! - **credentials**: account credentials, proxies, log-on details
//! - **totp**: one-time codes derived from a shared secret

pub mod client;
pub mod credentials;
pub mod totp;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{SessionClient, SessionEvent, SessionFactory, SessionFailure, REQUIRED_APP_ID};
pub use credentials::{Credentials, LogOnDetails, Proxy, SecondFactor, SessionOptions};
pub use totp::{auth_code, auth_code_now, TotpError};
