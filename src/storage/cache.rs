//! The item cache contract and an in-memory implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use crate::item::Item;

use super::migrations::MigrationError;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// Persistent store of lookup results, keyed by item id.
#[async_trait]
pub trait ItemCache: Send + Sync {
    /// Returns the stored record for `item_id`, if any.
    async fn find_by_item_id(&self, item_id: u64) -> Result<Option<Item>, CacheError>;

    /// Stores `item`, replacing any previous record with the same id.
    async fn save(&self, item: &Item) -> Result<(), CacheError>;
}

/// Process-local cache. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryItemCache {
    items: RwLock<HashMap<u64, Item>>,
}

impl MemoryItemCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ItemCache for MemoryItemCache {
    async fn find_by_item_id(&self, item_id: u64) -> Result<Option<Item>, CacheError> {
        Ok(self
            .items
            .read()
            .expect("cache lock poisoned")
            .get(&item_id)
            .cloned())
    }

    async fn save(&self, item: &Item) -> Result<(), CacheError> {
        self.items
            .write()
            .expect("cache lock poisoned")
            .insert(item.item_id, item.clone());
        Ok(())
    }
}
