//! # Document Store
//!
//! Raw reads and writes on the `entities` table. Everything here works on a
//! single connection handed in by the caller; transactions and retries are
//! the unit of work's business.
//!
//! ## Table Layout
//! ```text
//! ┌──────┬────────────┬────────────┬──────────────────────────┬─────────┐
//! │ seq  │ collection │ entity_key │ body                     │ version │
//! ├──────┼────────────┼────────────┼──────────────────────────┼─────────┤
//! │  1   │ owner      │ [1]        │ {"id":1,"name":"Acme"}   │    1    │
//! │  2   │ project    │ [10]       │ {"id":10,"owner_id":1..} │    3    │
//! │  3   │ owner      │ [2]        │ {"id":2,"name":"acorn"}  │    1    │
//! └──────┴────────────┴────────────┴──────────────────────────┴─────────┘
//!   seq = store order          UNIQUE (collection, entity_key)
//! ```

use chrono::Utc;
use sqlx::{FromRow, SqliteConnection};
use tracing::debug;

use crate::error::{DbError, DbResult};

/// One stored document.
#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub seq: i64,
    pub entity_key: String,
    pub body: String,
    pub version: i64,
}

impl DocumentRow {
    /// Parses the body into JSON.
    pub fn json(&self, collection: &str) -> DbResult<serde_json::Value> {
        serde_json::from_str(&self.body).map_err(|e| {
            DbError::Internal(format!(
                "corrupt document {collection}{}: {e}",
                self.entity_key
            ))
        })
    }
}

/// All documents of a collection, in store order.
pub async fn fetch_collection(
    conn: &mut SqliteConnection,
    collection: &str,
) -> DbResult<Vec<DocumentRow>> {
    let rows = sqlx::query_as::<_, DocumentRow>(
        r#"
        SELECT seq, entity_key, body, version
        FROM entities
        WHERE collection = ?
        ORDER BY seq
        "#,
    )
    .bind(collection)
    .fetch_all(conn)
    .await?;

    debug!(collection, rows = rows.len(), "Fetched collection");
    Ok(rows)
}

/// One document by key.
pub async fn fetch_one(
    conn: &mut SqliteConnection,
    collection: &str,
    key: &str,
) -> DbResult<Option<DocumentRow>> {
    let row = sqlx::query_as::<_, DocumentRow>(
        r#"
        SELECT seq, entity_key, body, version
        FROM entities
        WHERE collection = ? AND entity_key = ?
        "#,
    )
    .bind(collection)
    .bind(key)
    .fetch_optional(conn)
    .await?;

    Ok(row)
}

/// Inserts a new document.
///
/// ## Errors
/// `UniqueViolation` naming the collection and key if the key is taken.
pub async fn insert(
    conn: &mut SqliteConnection,
    collection: &str,
    key: &str,
    body: &str,
) -> DbResult<()> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO entities (collection, entity_key, body, created_at, updated_at, version)
        VALUES (?, ?, ?, ?, ?, 1)
        "#,
    )
    .bind(collection)
    .bind(key)
    .bind(body)
    .bind(&now)
    .bind(&now)
    .execute(conn)
    .await
    .map_err(|e| match DbError::from(e) {
        DbError::UniqueViolation { .. } => DbError::duplicate(format!("{collection} key"), key),
        other => other,
    })?;

    Ok(())
}

/// Replaces a document's body. Returns false if the key is not stored.
pub async fn update(
    conn: &mut SqliteConnection,
    collection: &str,
    key: &str,
    body: &str,
) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE entities
        SET body = ?, updated_at = ?, version = version + 1
        WHERE collection = ? AND entity_key = ?
        "#,
    )
    .bind(body)
    .bind(Utc::now().to_rfc3339())
    .bind(collection)
    .bind(key)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Deletes a document. Returns false if the key is not stored.
pub async fn delete(conn: &mut SqliteConnection, collection: &str, key: &str) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM entities WHERE collection = ? AND entity_key = ?")
        .bind(collection)
        .bind(key)
        .execute(conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Returns true if a document with this key is stored.
pub async fn contains_key(
    conn: &mut SqliteConnection,
    collection: &str,
    key: &str,
) -> DbResult<bool> {
    let found: i64 = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM entities WHERE collection = ? AND entity_key = ?)",
    )
    .bind(collection)
    .bind(key)
    .fetch_one(conn)
    .await?;

    Ok(found != 0)
}

/// Number of documents in a collection.
pub async fn count(conn: &mut SqliteConnection, collection: &str) -> DbResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE collection = ?")
        .bind(collection)
        .fetch_one(conn)
        .await?;

    Ok(count)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_insert_fetch_in_store_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        insert(&mut conn, "owner", "[2]", r#"{"id":2}"#).await.unwrap();
        insert(&mut conn, "owner", "[1]", r#"{"id":1}"#).await.unwrap();
        insert(&mut conn, "project", "[1]", r#"{"id":1}"#).await.unwrap();

        let rows = fetch_collection(&mut conn, "owner").await.unwrap();
        let keys: Vec<_> = rows.iter().map(|r| r.entity_key.as_str()).collect();
        assert_eq!(keys, vec!["[2]", "[1]"]);
        assert_eq!(count(&mut conn, "project").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_key_is_unique_violation() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        insert(&mut conn, "owner", "[1]", "{}").await.unwrap();
        let err = insert(&mut conn, "owner", "[1]", "{}").await.unwrap_err();

        match err {
            DbError::UniqueViolation { field, value } => {
                assert_eq!(field, "owner key");
                assert_eq!(value, "[1]");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_and_delete_report_missing_rows() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        assert!(!update(&mut conn, "owner", "[9]", "{}").await.unwrap());
        assert!(!delete(&mut conn, "owner", "[9]").await.unwrap());

        insert(&mut conn, "owner", "[9]", r#"{"v":1}"#).await.unwrap();
        assert!(update(&mut conn, "owner", "[9]", r#"{"v":2}"#).await.unwrap());

        let row = fetch_one(&mut conn, "owner", "[9]").await.unwrap().unwrap();
        assert_eq!(row.version, 2);
        assert_eq!(row.json("owner").unwrap()["v"], 2);

        assert!(contains_key(&mut conn, "owner", "[9]").await.unwrap());
        assert!(delete(&mut conn, "owner", "[9]").await.unwrap());
        assert!(fetch_one(&mut conn, "owner", "[9]").await.unwrap().is_none());
    }
}
