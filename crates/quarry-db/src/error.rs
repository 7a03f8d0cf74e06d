//! # Database Error Types
//!
//! Error types for store operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  CoreError (quarry-core)         SQLite Error (sqlx::Error)            │
//! │  bad path / operator / key       constraint, busy, pool, I/O           │
//! │       │                                 │                               │
//! │       └──────────────┬──────────────────┘                               │
//! │                      ▼                                                  │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  observed() ← logs store failures, returns them unchanged              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Caller matches on DbError::kind()                                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use quarry_core::{CoreError, ErrorKind};
use thiserror::Error;
use tracing::{debug, error};

/// Database operation errors.
///
/// These errors wrap sqlx errors and provide additional context
/// for debugging and for the caller's own error surface.
#[derive(Debug, Error)]
pub enum DbError {
    /// Query model error raised before touching the store.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Entity not found in the store.
    ///
    /// ## When This Occurs
    /// - `remove` or `update` with a key that is not stored
    /// - A staged update whose row was deleted before commit
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Committing an insert whose key is already stored
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Database is locked by another connection.
    ///
    /// ## When This Occurs
    /// - Another unit of work holds the write lock past the busy timeout
    /// - Shared-cache table lock (in-memory databases)
    #[error("Database busy: {0}")]
    Busy(String),

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file doesn't exist and can't be created
    /// - File permissions issue
    /// - Pool closed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed.
    ///
    /// ## When This Occurs
    /// - Beginning a transaction while one is already open
    /// - Committing a transaction that was already rolled back
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// The unit of work was disposed.
    #[error("Unit of work has been disposed")]
    Disposed,

    /// The caller's cancellation token fired.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Returns the coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Core(e) => e.kind(),
            DbError::NotFound { .. } => ErrorKind::NotFound,
            DbError::Cancelled(_) => ErrorKind::Cancelled,
            DbError::Busy(_)
            | DbError::ConnectionFailed(_)
            | DbError::PoolExhausted
            | DbError::Disposed => ErrorKind::Unavailable,
            DbError::UniqueViolation { .. }
            | DbError::ForeignKeyViolation { .. }
            | DbError::MigrationFailed(_)
            | DbError::QueryFailed(_)
            | DbError::TransactionFailed(_)
            | DbError::Internal(_) => ErrorKind::Persistence,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, DbError::Busy(_))
    }
}

/// SQLite primary result codes for a locked database.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

fn is_lock_error(code: Option<&str>, message: &str) -> bool {
    let primary = code.and_then(|c| c.parse::<i32>().ok()).map(|c| c & 0xff);
    matches!(primary, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED))
        || message.contains("database is locked")
        || message.contains("database table is locked")
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze code/message (busy, constraint type)
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// sqlx::Error::PoolClosed     → DbError::ConnectionFailed
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                if is_lock_error(db_err.code().as_deref(), msg) {
                    DbError::Busy(msg.to_string())
                } else if msg.contains("UNIQUE constraint failed") {
                    // "UNIQUE constraint failed: entities.collection, entities.entity_key"
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Logs a failed operation and hands the result back unchanged.
///
/// Store failures are logged at error level. Errors the caller caused
/// (bad configuration, validation, missing keys, cancellation) are only
/// traced at debug level.
pub fn observed<T>(result: DbResult<T>, operation: &'static str, entity: &str) -> DbResult<T> {
    if let Err(err) = &result {
        match err.kind() {
            ErrorKind::Persistence | ErrorKind::Unavailable => {
                error!(operation, entity, kind = %err.kind(), error = %err, "Store operation failed");
            }
            kind => {
                debug!(operation, entity, %kind, error = %err, "Operation rejected");
            }
        }
    }
    result
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_detection() {
        assert!(is_lock_error(Some("5"), "database is locked"));
        assert!(is_lock_error(Some("517"), "busy snapshot"));
        assert!(is_lock_error(Some("262"), "locked shared cache"));
        assert!(is_lock_error(None, "database table is locked: entities"));
        assert!(!is_lock_error(Some("2067"), "UNIQUE constraint failed: entities.entity_key"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(DbError::not_found("project", "[1]").kind(), ErrorKind::NotFound);
        assert_eq!(DbError::duplicate("key", "[1]").kind(), ErrorKind::Persistence);
        assert_eq!(DbError::Disposed.kind(), ErrorKind::Unavailable);
        assert_eq!(DbError::Cancelled("commit".into()).kind(), ErrorKind::Cancelled);

        let core = DbError::from(CoreError::InvalidPath("a..b".to_string()));
        assert_eq!(core.kind(), ErrorKind::Configuration);
        assert_eq!(core.to_string(), "Invalid property path: 'a..b'");
    }

    #[test]
    fn test_sqlx_mapping() {
        assert!(matches!(DbError::from(sqlx::Error::PoolTimedOut), DbError::PoolExhausted));
        assert!(matches!(
            DbError::from(sqlx::Error::PoolClosed),
            DbError::ConnectionFailed(_)
        ));
    }

    #[test]
    fn test_observed_passes_result_through() {
        let ok: DbResult<u8> = observed(Ok(3), "count", "project");
        assert_eq!(ok.unwrap(), 3);

        let err: DbResult<u8> = observed(Err(DbError::Busy("locked".into())), "commit", "project");
        assert!(err.unwrap_err().is_busy());
    }
}
