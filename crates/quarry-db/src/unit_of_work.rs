//! # Unit of Work
//!
//! One logical session over the store: a pooled connection, one repository
//! per entity type, staged changes and transactions.
//!
//! ## Commit Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  uow.commit(&cancel)                                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  tracker.pending()  ← Added → INSERT, edited/Modified → UPDATE,        │
//! │       │               Deleted → DELETE (tracking order)                 │
//! │       ▼                                                                 │
//! │  explicit transaction open?                                            │
//! │       ├── yes ──► write inside it (caller commits/rolls back)          │
//! │       │                                                                 │
//! │       └── no ───► BEGIN IMMEDIATE  (busy? back off and retry)          │
//! │                     │                                                   │
//! │                     ▼                                                   │
//! │                   writes ──error/cancel──► ROLLBACK ──► Err            │
//! │                     │                                                   │
//! │                     ▼                                                   │
//! │                   COMMIT ──► tracker.accept() ──► CommitSummary        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifetime
//! A unit of work holds its connection until [`UnitOfWork::dispose`] (or
//! drop). After disposal every operation on it, its repositories and their
//! queries fails with [`DbError::Disposed`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use parking_lot::Mutex;
use quarry_core::Entity;
use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DbConfig;
use crate::error::{observed, DbError, DbResult};
use crate::repository::QueryRepository;
use crate::session::{cancellable, Session};
use crate::store;
use crate::tracking::PendingWrite;

// =============================================================================
// Isolation Levels
// =============================================================================

/// Requested isolation for an explicit transaction.
///
/// SQLite serializes writers, so every level is at least as strong as asked
/// for; the level picks how early the write lock is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Reads may see other sessions' uncommitted writes (shared cache only).
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Snapshot,
    Serializable,
}

impl IsolationLevel {
    fn begin_statement(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted | IsolationLevel::ReadCommitted => "BEGIN DEFERRED",
            IsolationLevel::RepeatableRead | IsolationLevel::Snapshot => "BEGIN IMMEDIATE",
            IsolationLevel::Serializable => "BEGIN EXCLUSIVE",
        }
    }

    fn read_uncommitted_pragma(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "PRAGMA read_uncommitted = 1",
            _ => "PRAGMA read_uncommitted = 0",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IsolationLevel::ReadUncommitted => "read_uncommitted",
            IsolationLevel::ReadCommitted => "read_committed",
            IsolationLevel::RepeatableRead => "repeatable_read",
            IsolationLevel::Snapshot => "snapshot",
            IsolationLevel::Serializable => "serializable",
        };
        f.write_str(name)
    }
}

/// Rows written by a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl CommitSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

// =============================================================================
// Unit of Work
// =============================================================================

/// A session over the store. Obtain one with [`crate::Database::unit_of_work`].
///
/// ## Example
/// ```rust,ignore
/// let uow = db.unit_of_work().await?;
/// let projects = uow.repository::<Project>()?;
/// projects.add(project)?;
/// uow.commit(&cancel).await?;
/// uow.dispose().await;
/// ```
pub struct UnitOfWork {
    session: Arc<Session>,
    repositories: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.session.id())
            .field("disposed", &self.session.is_disposed())
            .field("repositories", &self.repositories.lock().len())
            .finish()
    }
}

impl UnitOfWork {
    pub(crate) fn new(connection: PoolConnection<Sqlite>, config: Arc<DbConfig>) -> Self {
        UnitOfWork {
            session: Arc::new(Session::new(connection, config)),
            repositories: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.session.id()
    }

    pub fn is_disposed(&self) -> bool {
        self.session.is_disposed()
    }

    /// Repository for `T`; the same instance on every call.
    pub fn repository<T: Entity>(&self) -> DbResult<Arc<QueryRepository<T>>> {
        self.session.ensure_open()?;

        let mut repositories = self.repositories.lock();
        let entry = repositories
            .entry(TypeId::of::<T>())
            .or_insert_with(|| {
                debug!(uow = %self.session.id(), entity = T::NAME, "Creating repository");
                let repository: Arc<dyn Any + Send + Sync> =
                    Arc::new(QueryRepository::<T>::new(Arc::clone(&self.session)));
                repository
            })
            .clone();

        entry
            .downcast::<QueryRepository<T>>()
            .map_err(|_| DbError::Internal(format!("repository registry mismatch for {}", T::NAME)))
    }

    /// Returns true if a commit would write anything.
    pub fn has_changes(&self) -> bool {
        !self.session.is_disposed() && self.session.tracker().has_changes()
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Opens an explicit transaction on this unit of work's connection.
    ///
    /// Commits made while it is open write inside it. Only one transaction
    /// can be open at a time.
    pub async fn begin_transaction(
        &self,
        level: IsolationLevel,
        cancel: &CancellationToken,
    ) -> DbResult<Transaction> {
        let result = async {
            let mut guard = self.session.connection().await?;
            if self.session.in_transaction() {
                return Err(DbError::TransactionFailed(
                    "a transaction is already open on this unit of work".to_string(),
                ));
            }

            let conn: &mut SqliteConnection = &mut guard;
            let begun = cancellable(cancel, "begin_transaction", async move {
                sqlx::query(level.read_uncommitted_pragma())
                    .execute(&mut *conn)
                    .await?;
                sqlx::query(level.begin_statement()).execute(&mut *conn).await?;
                Ok::<_, DbError>(())
            })
            .await;
            if let Err(err) = begun {
                // BEGIN may still have run on the driver thread.
                self.session.set_rollback_pending(true);
                return Err(err);
            }

            self.session.set_in_transaction(true);
            self.session.tracker().open_journal();
            debug!(uow = %self.session.id(), %level, "Transaction started");
            Ok(Transaction {
                session: Arc::clone(&self.session),
                level,
                finished: false,
            })
        }
        .await;
        observed(result, "begin_transaction", "unit_of_work")
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Writes every staged and detected change atomically.
    ///
    /// ## Errors
    /// - `KeyChanged` if a tracked entity's key was edited
    /// - `UniqueViolation` for an insert whose key is already stored
    /// - `NotFound` for an update or delete whose row is gone
    /// - `Busy` if the write lock stayed taken through every retry
    /// - `Cancelled` if the token fired; nothing is written
    pub async fn commit(&self, cancel: &CancellationToken) -> DbResult<CommitSummary> {
        let result = self.commit_changes(cancel).await;
        observed(result, "commit", "unit_of_work")
    }

    async fn commit_changes(&self, cancel: &CancellationToken) -> DbResult<CommitSummary> {
        self.session.ensure_open()?;
        let writes = self.session.tracker().pending()?;
        if writes.is_empty() {
            debug!(uow = %self.session.id(), "Nothing to commit");
            return Ok(CommitSummary::default());
        }

        let mut guard = self.session.connection().await?;
        let conn: &mut SqliteConnection = &mut guard;

        if self.session.in_transaction() {
            let summary = cancellable(cancel, "commit", apply_writes(&mut *conn, &writes)).await?;
            self.session.tracker().accept(&writes);
            debug!(uow = %self.session.id(), ?summary, "Changes written inside open transaction");
            return Ok(summary);
        }

        self.begin_write(&mut *conn, cancel).await?;
        self.session.set_rollback_pending(true);

        let written = cancellable(cancel, "commit", async {
            let summary = apply_writes(&mut *conn, &writes).await?;
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok::<_, DbError>(summary)
        })
        .await;

        match written {
            Ok(summary) => {
                self.session.set_rollback_pending(false);
                self.session.tracker().accept(&writes);
                info!(
                    uow = %self.session.id(),
                    inserted = summary.inserted,
                    updated = summary.updated,
                    deleted = summary.deleted,
                    "Changes committed"
                );
                Ok(summary)
            }
            Err(err) => {
                if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    warn!(uow = %self.session.id(), error = %e, "Rollback after failed commit failed");
                }
                self.session.set_rollback_pending(false);
                Err(err)
            }
        }
    }

    /// `BEGIN IMMEDIATE`, retried with exponential backoff while the store
    /// is busy.
    async fn begin_write(
        &self,
        conn: &mut SqliteConnection,
        cancel: &CancellationToken,
    ) -> DbResult<()> {
        let config = self.session.config();
        let mut backoff = ExponentialBackoff {
            current_interval: config.commit_backoff,
            initial_interval: config.commit_backoff,
            max_interval: config.commit_backoff * 32,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        let mut attempt = 0u32;

        loop {
            let begun = cancellable(cancel, "commit", async {
                sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
                Ok::<_, DbError>(())
            })
            .await;

            match begun {
                Ok(()) => return Ok(()),
                Err(err) if err.is_busy() && attempt < config.commit_retries => {
                    attempt += 1;
                    let delay = backoff.next_backoff().unwrap_or(backoff.max_interval);
                    warn!(
                        uow = %self.session.id(),
                        attempt,
                        ?delay,
                        "Store busy, retrying commit"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(DbError::Cancelled("commit".to_string()));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    // =========================================================================
    // Disposal
    // =========================================================================

    /// Rolls back an open transaction, returns the connection to the pool
    /// and forgets all tracked state. Safe to call more than once.
    pub async fn dispose(&self) {
        if self.session.is_disposed() {
            return;
        }

        let rollback = self.session.needs_rollback();
        if let Some(mut conn) = self.session.take_connection().await {
            if rollback {
                if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    warn!(uow = %self.session.id(), error = %e, "Rollback on dispose failed; closing connection");
                    conn.close_on_drop();
                }
            }
        }
        self.session.set_in_transaction(false);
        self.session.set_rollback_pending(false);

        let discarded = {
            let mut tracker = self.session.tracker();
            let discarded = tracker.len();
            tracker.clear();
            discarded
        };
        self.repositories.lock().clear();

        debug!(uow = %self.session.id(), discarded, "Unit of work disposed");
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.session.is_disposed() {
            debug!(uow = %self.session.id(), "Unit of work dropped; releasing its connection");
            self.session.release();
        }
    }
}

async fn apply_writes(
    conn: &mut SqliteConnection,
    writes: &[PendingWrite],
) -> DbResult<CommitSummary> {
    let mut summary = CommitSummary::default();

    for write in writes {
        match write {
            PendingWrite::Insert {
                collection,
                key,
                body,
                ..
            } => {
                store::insert(conn, collection, key, &body.to_string()).await?;
                summary.inserted += 1;
            }
            PendingWrite::Update {
                collection,
                key,
                body,
                ..
            } => {
                if !store::update(conn, collection, key, &body.to_string()).await? {
                    return Err(DbError::not_found(*collection, key.clone()));
                }
                summary.updated += 1;
            }
            PendingWrite::Delete {
                collection, key, ..
            } => {
                if !store::delete(conn, collection, key).await? {
                    return Err(DbError::not_found(*collection, key.clone()));
                }
                summary.deleted += 1;
            }
        }
    }

    Ok(summary)
}

// =============================================================================
// Transaction
// =============================================================================

/// An explicit transaction. Finish it with [`commit`](Self::commit) or
/// [`rollback`](Self::rollback); dropping it rolls back on the unit of
/// work's next store access.
pub struct Transaction {
    session: Arc<Session>,
    level: IsolationLevel,
    finished: bool,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("session", &self.session.id())
            .field("level", &self.level)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Transaction {
    pub fn level(&self) -> IsolationLevel {
        self.level
    }

    pub async fn commit(mut self, cancel: &CancellationToken) -> DbResult<()> {
        let result = self.finish("COMMIT", cancel).await;
        observed(result, "commit_transaction", "unit_of_work")
    }

    pub async fn rollback(mut self, cancel: &CancellationToken) -> DbResult<()> {
        let result = self.finish("ROLLBACK", cancel).await;
        observed(result, "rollback_transaction", "unit_of_work")
    }

    async fn finish(&mut self, statement: &'static str, cancel: &CancellationToken) -> DbResult<()> {
        self.finished = true;
        let mut guard = self.session.connection().await?;
        if !self.session.in_transaction() {
            return Err(DbError::TransactionFailed(
                "transaction is no longer active".to_string(),
            ));
        }

        let conn: &mut SqliteConnection = &mut guard;
        let ended = cancellable(cancel, "transaction", async {
            sqlx::query(statement).execute(&mut *conn).await?;
            Ok::<_, DbError>(())
        })
        .await;

        if ended.is_err() {
            if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                debug!(session = %self.session.id(), error = %e, "Rollback after failed {statement}");
            }
        }
        if self.level == IsolationLevel::ReadUncommitted {
            let reset = sqlx::query("PRAGMA read_uncommitted = 0")
                .execute(&mut *conn)
                .await
                .map(|_| ())
                .map_err(DbError::from);
            // The next transaction sets the pragma again before BEGIN.
            let _ = observed(reset, "reset_isolation", "unit_of_work");
        }
        self.session.set_in_transaction(false);

        {
            let mut tracker = self.session.tracker();
            if statement == "COMMIT" && ended.is_ok() {
                tracker.close_journal();
            } else {
                let restored = tracker.rewind();
                debug!(session = %self.session.id(), restored, "Staged changes restored after rollback");
            }
        }

        if ended.is_ok() {
            debug!(session = %self.session.id(), statement, "Transaction finished");
        }
        ended
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished && !self.session.is_disposed() {
            warn!(
                session = %self.session.id(),
                "Transaction dropped without commit or rollback; rolling back"
            );
            self.session.set_rollback_pending(true);
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
