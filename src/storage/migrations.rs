//! Schema migrations for the item cache.
//!
//! Every entry of [`schema::MIGRATIONS`] runs at most once per database. A
//! pass runs in one transaction holding an advisory lock, so instances
//! starting against the same database apply each change exactly once.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info};

use super::schema::{self, Migration};

/// Advisory lock key serializing migration passes ("INSPECT" in ASCII).
const MIGRATION_LOCK_KEY: i64 = 0x0049_4e53_5045_4354;

const CREATE_LEDGER: &str = r#"
CREATE TABLE IF NOT EXISTS _inspect_migrations (
    name TEXT PRIMARY KEY,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Errors that can occur while migrating.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A migration's own SQL was rejected.
    #[error("Migration {name} failed: {source}")]
    Failed {
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// A migration recorded in the ledger table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppliedMigration {
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Applies [`schema::MIGRATIONS`] to a database.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies every pending migration.
    ///
    /// Returns the names applied by this call; empty when the schema was
    /// already current. A failure rolls back the whole pass.
    pub async fn run_migrations(&self) -> Result<Vec<&'static str>, MigrationError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *tx)
            .await?;
        sqlx::query(CREATE_LEDGER).execute(&mut *tx).await?;

        let recorded: Vec<String> = sqlx::query_scalar("SELECT name FROM _inspect_migrations")
            .fetch_all(&mut *tx)
            .await?;
        let recorded: HashSet<String> = recorded.into_iter().collect();

        let mut applied = Vec::new();
        for migration in pending(&recorded) {
            sqlx::query(migration.sql)
                .execute(&mut *tx)
                .await
                .map_err(|source| MigrationError::Failed {
                    name: migration.name,
                    source,
                })?;
            sqlx::query("INSERT INTO _inspect_migrations (name) VALUES ($1)")
                .bind(migration.name)
                .execute(&mut *tx)
                .await?;
            info!(migration = migration.name, "Applied migration");
            applied.push(migration.name);
        }

        tx.commit().await?;
        if applied.is_empty() {
            debug!("Item cache schema is current");
        }
        Ok(applied)
    }

    /// Migrations recorded in the ledger, oldest first.
    pub async fn applied(&self) -> Result<Vec<AppliedMigration>, MigrationError> {
        sqlx::query(CREATE_LEDGER).execute(&self.pool).await?;

        let rows = sqlx::query_as::<_, AppliedMigration>(
            "SELECT name, applied_at FROM _inspect_migrations ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Drops the item table and the ledger. Cached items are lost.
    pub async fn drop_all(&self) -> Result<(), MigrationError> {
        for table in [schema::tables::ITEMS, schema::tables::MIGRATIONS] {
            sqlx::query(&format!("DROP TABLE IF EXISTS {} CASCADE", table))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

/// Migrations not yet in `recorded`, in application order.
fn pending(recorded: &HashSet<String>) -> impl Iterator<Item = &'static Migration> + '_ {
    schema::MIGRATIONS
        .iter()
        .filter(move |migration| !recorded.contains(migration.name))
}
