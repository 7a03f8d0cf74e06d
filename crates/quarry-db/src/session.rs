//! Connection and tracking state shared by a unit of work, its repositories
//! and their queries.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection};
use tokio::sync::{MappedMutexGuard, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::config::DbConfig;
use crate::error::{DbError, DbResult};
use crate::tracking::ChangeTracker;

/// One logical session: a pooled connection plus the identity map.
///
/// The locks only make the session `Send + Sync`; a unit of work is still
/// meant to be driven by one caller at a time.
pub struct Session {
    id: Uuid,
    connection: AsyncMutex<Option<PoolConnection<Sqlite>>>,
    tracker: Mutex<ChangeTracker>,
    in_transaction: AtomicBool,
    /// Set while a write transaction is open that nobody will finish
    /// (interrupted commit, dropped `Transaction`). The next user of the
    /// connection rolls it back first.
    rollback_pending: AtomicBool,
    disposed: AtomicBool,
    config: Arc<DbConfig>,
}

impl Session {
    pub fn new(connection: PoolConnection<Sqlite>, config: Arc<DbConfig>) -> Self {
        Session {
            id: Uuid::new_v4(),
            connection: AsyncMutex::new(Some(connection)),
            tracker: Mutex::new(ChangeTracker::new()),
            in_transaction: AtomicBool::new(false),
            rollback_pending: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            config,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn ensure_open(&self) -> DbResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(DbError::Disposed);
        }
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Locks the identity map. Never held across an `.await`.
    pub fn tracker(&self) -> MutexGuard<'_, ChangeTracker> {
        self.tracker.lock()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    pub fn set_in_transaction(&self, open: bool) {
        self.in_transaction.store(open, Ordering::SeqCst);
    }

    pub fn set_rollback_pending(&self, pending: bool) {
        self.rollback_pending.store(pending, Ordering::SeqCst);
    }

    /// Exclusive access to the session's connection.
    ///
    /// Rolls back an abandoned transaction before handing the connection
    /// out.
    pub async fn connection(&self) -> DbResult<MappedMutexGuard<'_, SqliteConnection>> {
        self.ensure_open()?;
        let mut guard = self.connection.lock().await;

        if self.rollback_pending.swap(false, Ordering::SeqCst) {
            if let Some(conn) = guard.as_mut() {
                if let Err(e) = sqlx::query("ROLLBACK").execute(&mut **conn).await {
                    warn!(session = %self.id, error = %e, "Rollback of abandoned transaction failed");
                }
            }
            self.set_in_transaction(false);
            self.tracker().rewind();
        }

        AsyncMutexGuard::try_map(guard, |slot| slot.as_mut().map(|conn| &mut **conn))
            .map_err(|_| DbError::Disposed)
    }

    /// Marks the session disposed and hands back its connection.
    pub async fn take_connection(&self) -> Option<PoolConnection<Sqlite>> {
        self.disposed.store(true, Ordering::SeqCst);
        self.connection.lock().await.take()
    }

    /// Marks the session disposed without waiting: returns the connection
    /// to the pool if nobody is using it, closing it instead when a
    /// transaction may still be open on it.
    pub fn release(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        let rollback = self.needs_rollback();

        if let Ok(mut slot) = self.connection.try_lock() {
            if let Some(mut conn) = slot.take() {
                if rollback {
                    conn.close_on_drop();
                }
            }
        }
        self.tracker().clear();
    }

    /// Whether a transaction may still be open on the connection.
    pub fn needs_rollback(&self) -> bool {
        self.in_transaction() || self.rollback_pending.load(Ordering::SeqCst)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.needs_rollback() {
            if let Some(conn) = self.connection.get_mut().as_mut() {
                warn!(session = %self.id, "Session dropped inside a transaction; closing its connection");
                conn.close_on_drop();
            }
        }
    }
}

/// Runs a store future unless the token fires first.
pub async fn cancellable<F, R>(
    cancel: &CancellationToken,
    operation: &'static str,
    future: F,
) -> DbResult<R>
where
    F: Future<Output = DbResult<R>>,
{
    if cancel.is_cancelled() {
        return Err(DbError::Cancelled(operation.to_string()));
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DbError::Cancelled(operation.to_string())),
        result = future => result,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
