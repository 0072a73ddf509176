//! Inspect links: the textual identifiers of a single item instance.
//!
//! An inspect link names the asset to look up, the listing or market entry
//! that authorizes the lookup, and the `d` token. The coordinator protocol
//! consumes these as the 4-tuple `(s, a, d, m)` exposed by
//! [`InspectLink::parameters`].

pub mod link;

pub use link::{InspectLink, InspectParams, OwnerKind, PLACEHOLDER_ACCOUNT};
