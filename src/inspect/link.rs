//! Parsing and formatting of inspect links.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Account id embedded in formatted links.
///
/// The link syntax requires an account segment, but the coordinator never
/// reads it, so a fixed value is used. It is unrelated to the owner id.
pub const PLACEHOLDER_ACCOUNT: u64 = 76561202255233023;

const LINK_PATTERN: &str =
    r"^steam://rungame/730/\d+/[+ ]csgo_econ_action_preview ([SM])(\d+)A(\d+)D(\d+)$";

fn link_regex() -> &'static Regex {
    static LINK_REGEX: OnceLock<Regex> = OnceLock::new();
    LINK_REGEX.get_or_init(|| Regex::new(LINK_PATTERN).expect("inspect link pattern is valid"))
}

/// Which kind of entry authorizes the lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    /// A listing (`S` links): the owner id is the inventory owner.
    Listing,
    /// A community market entry (`M` links): the owner id is the market listing.
    Market,
}

impl OwnerKind {
    fn prefix(&self) -> char {
        match self {
            OwnerKind::Listing => 'S',
            OwnerKind::Market => 'M',
        }
    }
}

/// The unified parameter tuple sent to the coordinator.
///
/// Exactly one of `s` and `m` carries the owner id; the other is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InspectParams {
    pub s: u64,
    pub a: u64,
    pub d: u64,
    pub m: u64,
}

impl InspectParams {
    /// Owner value for the inspect call: whichever of `s`/`m` is set.
    pub fn owner(&self) -> u64 {
        if self.s == 0 {
            self.m
        } else {
            self.s
        }
    }
}

/// A parsed inspect link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InspectLink {
    pub owner_kind: OwnerKind,
    pub owner_id: u64,
    pub asset_id: u64,
    pub auth_token: u64,
}

impl InspectLink {
    pub fn new(owner_kind: OwnerKind, owner_id: u64, asset_id: u64, auth_token: u64) -> Self {
        Self {
            owner_kind,
            owner_id,
            asset_id,
            auth_token,
        }
    }

    /// Parses the textual form of a link.
    ///
    /// The input is URL-decoded first, so `%20` may stand in for the space
    /// before the `S`/`M` segment. Returns `None` for anything that does not
    /// match the link grammar, including ids that overflow 64 bits.
    pub fn parse(url: &str) -> Option<Self> {
        let decoded = urlencoding::decode(url).ok()?;
        let caps = link_regex().captures(&decoded)?;

        let owner_kind = match &caps[1] {
            "M" => OwnerKind::Market,
            _ => OwnerKind::Listing,
        };
        let owner_id = caps[2].parse().ok()?;
        let asset_id = caps[3].parse().ok()?;
        let auth_token = caps[4].parse().ok()?;

        Some(Self::new(owner_kind, owner_id, asset_id, auth_token))
    }

    /// Builds a link from discrete query parameters.
    ///
    /// A present, non-zero `m` selects a market link; otherwise `s` must be
    /// present and a listing link is built.
    pub fn from_parameters(a: u64, d: u64, s: Option<u64>, m: Option<u64>) -> Option<Self> {
        match (m.filter(|m| *m != 0), s) {
            (Some(m), _) => Some(Self::new(OwnerKind::Market, m, a, d)),
            (None, Some(s)) => Some(Self::new(OwnerKind::Listing, s, a, d)),
            (None, None) => None,
        }
    }

    /// The `(s, a, d, m)` tuple with the inactive owner slot zeroed.
    pub fn parameters(&self) -> InspectParams {
        let (s, m) = match self.owner_kind {
            OwnerKind::Listing => (self.owner_id, 0),
            OwnerKind::Market => (0, self.owner_id),
        };
        InspectParams {
            s,
            a: self.asset_id,
            d: self.auth_token,
            m,
        }
    }

    pub fn is_market(&self) -> bool {
        self.owner_kind == OwnerKind::Market
    }
}

impl fmt::Display for InspectLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "steam://rungame/730/{}/+csgo_econ_action_preview {}{}A{}D{}",
            PLACEHOLDER_ACCOUNT,
            self.owner_kind.prefix(),
            self.owner_id,
            self.asset_id,
            self.auth_token
        )
    }
}

impl FromStr for InspectLink {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or(ApiError::InvalidInspect)
    }
}
