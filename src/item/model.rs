//! Item data model and persistence encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inspect::InspectLink;

/// Encodes an unsigned 64-bit id for a signed BIGINT column.
///
/// The bit pattern is kept as-is and reinterpreted as two's complement, so
/// ids above `i64::MAX` are stored as negative numbers.
pub fn encode_u64(value: u64) -> i64 {
    i64::from_ne_bytes(value.to_ne_bytes())
}

/// Inverse of [`encode_u64`].
pub fn decode_i64(value: i64) -> u64 {
    u64::from_ne_bytes(value.to_ne_bytes())
}

/// Sticker attributes as reported by the coordinator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StickerInfo {
    pub slot: i32,
    pub sticker_id: i32,
    pub wear: Option<f64>,
    pub scale: Option<f64>,
    pub rotation: Option<f64>,
}

/// Item attributes as reported by the coordinator for one asset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ItemInfo {
    pub item_id: u64,
    pub def_index: i32,
    pub paint_index: i32,
    pub rarity: i32,
    pub quality: i32,
    pub origin: i32,
    /// Wear value.
    pub paint_wear: f64,
    pub paint_seed: Option<i32>,
    pub stickers: Vec<StickerInfo>,
}

/// A sticker applied to an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sticker {
    pub slot: i32,
    pub id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wear: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
}

impl From<&StickerInfo> for Sticker {
    fn from(info: &StickerInfo) -> Self {
        // Zero means "not set" on the wire.
        let non_zero = |v: Option<f64>| v.filter(|v| *v != 0.0);
        Self {
            slot: info.slot,
            id: info.sticker_id,
            wear: non_zero(info.wear),
            scale: non_zero(info.scale),
            rotation: non_zero(info.rotation),
        }
    }
}

/// Normalized lookup result, keyed by `item_id` in the cache.
///
/// Serializes in camelCase with 64-bit ids as decimal strings, since JSON
/// consumers commonly cannot represent them as numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(with = "u64_string")]
    pub item_id: u64,
    #[serde(with = "u64_string")]
    pub m: u64,
    #[serde(with = "u64_string")]
    pub s: u64,
    #[serde(with = "u64_string")]
    pub d: u64,
    pub rarity: i32,
    pub origin: i32,
    pub quality: i32,
    pub paint_index: i32,
    pub paint_seed: i32,
    pub def_index: i32,
    pub float_value: f64,
    pub stickers: Vec<Sticker>,
    pub last_update: DateTime<Utc>,
}

impl Item {
    /// Builds the record for a successful lookup of `link`.
    pub fn from_item_info(link: &InspectLink, info: &ItemInfo) -> Self {
        let params = link.parameters();
        Self {
            item_id: info.item_id,
            m: params.m,
            s: params.s,
            d: params.d,
            rarity: info.rarity,
            origin: info.origin,
            quality: info.quality,
            paint_index: info.paint_index,
            paint_seed: info.paint_seed.unwrap_or(0),
            def_index: info.def_index,
            float_value: info.paint_wear,
            stickers: info.stickers.iter().map(Sticker::from).collect(),
            last_update: Utc::now(),
        }
    }
}

mod u64_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::OwnerKind;

    fn sample_info() -> ItemInfo {
        ItemInfo {
            item_id: 6760346663,
            def_index: 7,
            paint_index: 282,
            rarity: 5,
            quality: 4,
            origin: 8,
            paint_wear: 0.2161,
            paint_seed: None,
            stickers: vec![
                StickerInfo {
                    slot: 0,
                    sticker_id: 4965,
                    wear: Some(0.0),
                    scale: None,
                    rotation: Some(12.5),
                },
                StickerInfo {
                    slot: 2,
                    sticker_id: 5012,
                    wear: Some(0.31),
                    scale: Some(0.0),
                    rotation: None,
                },
            ],
        }
    }

    #[test]
    fn test_encoding_round_trip_extremes() {
        for value in [0, 1, i64::MAX as u64, 1 << 63, u64::MAX - 1, u64::MAX] {
            assert_eq!(decode_i64(encode_u64(value)), value);
        }
    }

    #[test]
    fn test_encoding_preserves_bit_pattern() {
        assert_eq!(encode_u64(0), 0);
        assert_eq!(encode_u64(42), 42);
        assert_eq!(encode_u64(u64::MAX), -1);
        assert_eq!(encode_u64(1 << 63), i64::MIN);
        assert_eq!(decode_i64(-1), u64::MAX);
    }

    #[test]
    fn test_from_item_info_takes_owner_from_link() {
        let link = InspectLink::new(OwnerKind::Market, 625254122282020305, 6760346663, 99);
        let item = Item::from_item_info(&link, &sample_info());

        assert_eq!(item.item_id, 6760346663);
        assert_eq!(item.m, 625254122282020305);
        assert_eq!(item.s, 0);
        assert_eq!(item.d, 99);
        assert_eq!(item.paint_index, 282);
        assert_eq!(item.paint_seed, 0);
        assert!((item.float_value - 0.2161).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_sticker_attributes_are_dropped() {
        let link = InspectLink::new(OwnerKind::Listing, 1, 6760346663, 2);
        let item = Item::from_item_info(&link, &sample_info());

        assert_eq!(item.stickers.len(), 2);
        assert_eq!(item.stickers[0].id, 4965);
        assert_eq!(item.stickers[0].wear, None);
        assert_eq!(item.stickers[0].rotation, Some(12.5));
        assert_eq!(item.stickers[1].wear, Some(0.31));
        assert_eq!(item.stickers[1].scale, None);
    }

    #[test]
    fn test_item_json_shape() {
        let link = InspectLink::new(OwnerKind::Listing, u64::MAX, 6760346663, 2);
        let item = Item::from_item_info(&link, &sample_info());
        let json = serde_json::to_value(&item).expect("item should serialize");

        assert_eq!(json["itemId"], "6760346663");
        assert_eq!(json["s"], "18446744073709551615");
        assert_eq!(json["paintIndex"], 282);
        assert!(json["stickers"][0].get("wear").is_none());

        let back: Item = serde_json::from_value(json).expect("item should deserialize");
        assert_eq!(back, item);
    }
}
