//! Item records produced by successful lookups.
//!
//! - `ItemInfo`: the raw attributes the coordinator reports for an asset
//! - `Item`: the normalized record delivered to callers and cached
//! - `encode_u64` / `decode_i64`: the BIGINT column transform for 64-bit ids

pub mod model;

pub use model::{decode_i64, encode_u64, Item, ItemInfo, Sticker, StickerInfo};
