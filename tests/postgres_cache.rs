//! Integration tests for the PostgreSQL item cache.
//!
//! These tests need a live database.
//! Run with: DATABASE_URL=postgres://... cargo test --test postgres_cache -- --ignored

use inspect_dispatch::item::{ItemInfo, StickerInfo};
use inspect_dispatch::storage::{ItemCache, MigrationRunner, PgItemRepository};
use inspect_dispatch::{InspectLink, Item, OwnerKind};

async fn connect() -> PgItemRepository {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL environment variable must be set for integration tests");
    let repo = PgItemRepository::connect(&url)
        .await
        .expect("Should connect to database");
    repo.run_migrations().await.expect("Migrations should apply");
    repo
}

fn item(asset_id: u64, paint_wear: f64) -> Item {
    let link = InspectLink::new(OwnerKind::Market, u64::MAX, asset_id, u64::MAX - 1);
    Item::from_item_info(
        &link,
        &ItemInfo {
            item_id: asset_id,
            def_index: 7,
            paint_index: 282,
            rarity: 6,
            quality: 4,
            origin: 8,
            paint_wear,
            paint_seed: Some(321),
            stickers: vec![StickerInfo {
                slot: 0,
                sticker_id: 4915,
                wear: Some(0.1),
                ..Default::default()
            }],
        },
    )
}

#[tokio::test]
#[ignore] // Run with: cargo test --test postgres_cache -- --ignored
async fn test_migrations_are_idempotent() {
    let repo = connect().await;
    let applied = repo.run_migrations().await.expect("Second run should succeed");
    assert!(applied.is_empty());

    let recorded = MigrationRunner::new(repo.pool().clone())
        .applied()
        .await
        .expect("Should list migrations");
    assert!(recorded.iter().any(|m| m.name == "0001_create_csgo_item"));
}

#[tokio::test]
#[ignore]
async fn test_round_trip_preserves_full_u64_range() {
    let repo = connect().await;
    let stored = item(u64::MAX, 0.25);
    repo.save(&stored).await.expect("Should save");

    let found = repo
        .find_by_item_id(u64::MAX)
        .await
        .expect("Should query")
        .expect("Item should exist");

    assert_eq!(found.item_id, u64::MAX);
    assert_eq!(found.m, u64::MAX);
    assert_eq!(found.d, u64::MAX - 1);
    assert_eq!(found.paint_seed, 321);
    assert_eq!(found.stickers, stored.stickers);
}

#[tokio::test]
#[ignore]
async fn test_save_overwrites_existing_row() {
    let repo = connect().await;
    let asset_id = 1 << 63;

    repo.save(&item(asset_id, 0.1)).await.expect("Should save");
    repo.save(&item(asset_id, 0.9)).await.expect("Should upsert");

    let found = repo
        .find_by_item_id(asset_id)
        .await
        .expect("Should query")
        .expect("Item should exist");
    assert!((found.float_value - 0.9).abs() < 1e-9);
}

#[tokio::test]
#[ignore]
async fn test_missing_item_is_none() {
    let repo = connect().await;
    let found = repo
        .find_by_item_id(u64::MAX - 7)
        .await
        .expect("Should query");
    assert!(found.is_none());
}
