//! One-time login codes derived from a shared secret.
//!
//! Codes are five characters: HMAC-SHA1 of the 30-second time step, dynamic
//! truncation, then base-26 digits from a restricted alphabet.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use thiserror::Error;

const CODE_ALPHABET: &[u8] = b"23456789BCDFGHJKMNPQRTVWXY";
const CODE_LEN: usize = 5;
const TIME_STEP_SECS: u64 = 30;
const HEX_SECRET_LEN: usize = 40;

type HmacSha1 = Hmac<Sha1>;

/// Errors deriving a one-time code.
#[derive(Debug, Error)]
pub enum TotpError {
    #[error("shared secret is neither base64 nor 40-character hex: {0}")]
    InvalidSecret(String),
}

/// Current unix time in seconds.
pub(crate) fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

fn decode_secret(secret: &str) -> Result<Vec<u8>, TotpError> {
    if secret.len() == HEX_SECRET_LEN && secret.chars().all(|c| c.is_ascii_hexdigit()) {
        return hex::decode(secret).map_err(|e| TotpError::InvalidSecret(e.to_string()));
    }
    STANDARD
        .decode(secret)
        .map_err(|e| TotpError::InvalidSecret(e.to_string()))
}

/// Derives the code valid at `unix_time` for `shared_secret`.
pub fn auth_code(shared_secret: &str, unix_time: u64) -> Result<String, TotpError> {
    let key = decode_secret(shared_secret)?;
    let mut mac =
        HmacSha1::new_from_slice(&key).map_err(|e| TotpError::InvalidSecret(e.to_string()))?;
    mac.update(&(unix_time / TIME_STEP_SECS).to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = usize::from(digest[digest.len() - 1] & 0x0f);
    let mut full = u32::from_be_bytes([
        digest[offset],
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]) & 0x7fff_ffff;

    let radix = CODE_ALPHABET.len() as u32;
    let mut code = String::with_capacity(CODE_LEN);
    for _ in 0..CODE_LEN {
        code.push(char::from(CODE_ALPHABET[(full % radix) as usize]));
        full /= radix;
    }
    Ok(code)
}

/// Derives the code valid right now.
pub fn auth_code_now(shared_secret: &str) -> Result<String, TotpError> {
    auth_code(shared_secret, unix_now())
}
