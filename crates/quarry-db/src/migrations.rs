//! # Database Migrations
//!
//! The `entities` document table and its indexes, embedded from
//! `migrations/sqlite` at compile time.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Database::new()  (config.run_migrations)                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  MIGRATOR.run(pool) ──► _sqlx_migrations records each version          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  entities (seq, collection, entity_key, body, version, timestamps)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! New schema changes go in a new `NNN_description.sql` file; applied files
//! are never edited.

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applied vs embedded migrations of a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Versions compiled into this binary.
    pub embedded: Vec<i64>,
    /// Versions the store recorded as successfully applied.
    pub applied: Vec<i64>,
}

impl MigrationStatus {
    /// Embedded versions the store has not applied yet.
    pub fn pending(&self) -> Vec<i64> {
        self.embedded
            .iter()
            .copied()
            .filter(|version| !self.applied.contains(version))
            .collect()
    }

    /// True when the `entities` table is at the schema this binary expects.
    pub fn is_current(&self) -> bool {
        self.pending().is_empty()
    }
}

/// Applies every pending migration, each in its own transaction.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    debug!(embedded = MIGRATOR.migrations.len(), "Checking entity store schema");
    MIGRATOR.run(pool).await?;
    info!("Entity store schema is current");
    Ok(())
}

/// Reads which migrations the store has applied. A store that never ran
/// migrations reports none applied; any other failed read is returned.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<MigrationStatus> {
    let embedded = MIGRATOR.migrations.iter().map(|m| m.version).collect();

    let tracked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;

    let applied = if tracked == 0 {
        Vec::new()
    } else {
        sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1 ORDER BY version")
            .fetch_all(pool)
            .await?
    };

    Ok(MigrationStatus { embedded, applied })
}

// =============================================================================
// Unit Tests
// =============================================================================
