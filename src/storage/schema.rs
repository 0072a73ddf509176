//! Database schema constants and SQL queries.
//!
//! This module contains all SQL schema definitions and query templates
//! for the PostgreSQL item cache.

/// SQL schema for creating the item table.
///
/// 64-bit unsigned ids are stored in BIGINT columns with their bit pattern
/// preserved (see [`crate::item::encode_u64`]).
pub const CREATE_ITEMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS csgo_item (
    item_id BIGINT PRIMARY KEY,
    m BIGINT NOT NULL,
    s BIGINT NOT NULL,
    d BIGINT NOT NULL,
    rarity INTEGER NOT NULL,
    origin INTEGER NOT NULL,
    quality INTEGER NOT NULL,
    paint_index INTEGER NOT NULL,
    paint_seed INTEGER NOT NULL,
    def_index INTEGER NOT NULL,
    float_value DOUBLE PRECISION NOT NULL,
    stickers JSONB NOT NULL DEFAULT '[]'::jsonb,
    last_update TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL for creating indexes.
pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_csgo_item_last_update ON csgo_item(last_update)
"#;

/// Upsert keyed by `item_id`; the newest lookup replaces the whole row.
pub const UPSERT_ITEM: &str = r#"
INSERT INTO csgo_item (
    item_id, m, s, d, rarity, origin, quality, paint_index,
    paint_seed, def_index, float_value, stickers, last_update
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
ON CONFLICT (item_id) DO UPDATE SET
    m = EXCLUDED.m,
    s = EXCLUDED.s,
    d = EXCLUDED.d,
    rarity = EXCLUDED.rarity,
    origin = EXCLUDED.origin,
    quality = EXCLUDED.quality,
    paint_index = EXCLUDED.paint_index,
    paint_seed = EXCLUDED.paint_seed,
    def_index = EXCLUDED.def_index,
    float_value = EXCLUDED.float_value,
    stickers = EXCLUDED.stickers,
    last_update = EXCLUDED.last_update
"#;

pub const SELECT_ITEM: &str = r#"
SELECT item_id, m, s, d, rarity, origin, quality, paint_index,
       paint_seed, def_index, float_value, stickers, last_update
FROM csgo_item
WHERE item_id = $1
"#;

/// A named schema change. Names are recorded once applied and must never
/// be reused for different SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

/// Schema changes in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "0001_create_csgo_item",
        sql: CREATE_ITEMS_TABLE,
    },
    Migration {
        name: "0002_index_csgo_item_last_update",
        sql: CREATE_INDEXES,
    },
];

/// Table names in the schema.
pub mod tables {
    /// Item cache table name.
    pub const ITEMS: &str = "csgo_item";
    /// Applied migrations table name.
    pub const MIGRATIONS: &str = "_inspect_migrations";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered_and_unique() {
        assert!(MIGRATIONS[0].sql.contains(tables::ITEMS));
        assert!(MIGRATIONS[1].sql.contains("CREATE INDEX"));

        let mut names: Vec<_> = MIGRATIONS.iter().map(|m| m.name).collect();
        let in_order = names.clone();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names, in_order);
    }

    #[test]
    fn test_upsert_covers_every_column() {
        for column in [
            "m", "s", "d", "rarity", "origin", "quality", "paint_index", "paint_seed",
            "def_index", "float_value", "stickers", "last_update",
        ] {
            assert!(
                UPSERT_ITEM.contains(&format!("{column} = EXCLUDED.{column}")),
                "{column} is not updated on conflict"
            );
        }
    }
}
