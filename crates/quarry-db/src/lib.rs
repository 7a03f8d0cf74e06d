//! # quarry-db: Database Layer for Quarry
//!
//! This crate provides store access for Quarry: entities persist as JSON
//! documents in SQLite, accessed with sqlx, and are queried through the
//! generic repository using predicates and orderings from `quarry-core`.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Quarry Data Flow                               │
//! │                                                                         │
//! │  Application code (repo.query(&request, &cancel))                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    quarry-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  UnitOfWork   │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │───►│  Session      │    │  (embedded)  │  │   │
//! │  │   │               │    │  ChangeTracker│    │              │  │   │
//! │  │   │ SqlitePool    │    │      │        │    │ 001_entity_  │  │   │
//! │  │   │ DbConfig      │    │      ▼        │    │   store.sql  │  │   │
//! │  │   │               │    │ QueryRepo<T>  │    │              │  │   │
//! │  │   │               │    │ Query<T, M>   │    │              │  │   │
//! │  │   └───────────────┘    └───────┬───────┘    └──────────────┘  │   │
//! │  │                                │ store.rs                      │   │
//! │  └────────────────────────────────┼────────────────────────────────┘   │
//! │                                   ▼                                     │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │             SQLite Database (entities table)                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation, unit-of-work hand-out
//! - [`config`] - Pool, commit and paging settings
//! - [`migrations`] - Embedded database migrations
//! - [`unit_of_work`] - Sessions, commits, transactions
//! - [`repository`] - Generic query repository
//! - [`query`] - Lazy queries and tracking modes
//! - [`tracking`] - Identity map and change detection
//! - [`store`] - Document reads and writes
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quarry_db::{Database, DbConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let db = Database::new(DbConfig::from_env()?).await?;
//! let cancel = CancellationToken::new();
//!
//! let uow = db.unit_of_work().await?;
//! let projects = uow.repository::<Project>()?;
//! let page = projects
//!     .get_filtered("apollo", None, &["owner"])?
//!     .order_by("owner.name")?
//!     .page(PageRequest::default(), &cancel)
//!     .await?;
//! uow.dispose().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod query;
pub mod repository;
pub mod store;
pub mod tracking;
pub mod unit_of_work;

mod session;

#[cfg(test)]
mod test_fixtures;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ConfigError, DbConfig};
pub use error::{DbError, DbResult};
pub use migrations::MigrationStatus;
pub use pool::Database;
pub use query::{Attached, Detached, Query, TrackingMode};
pub use repository::QueryRepository;
pub use tracking::Tracked;
pub use unit_of_work::{CommitSummary, IsolationLevel, Transaction, UnitOfWork};

// The query model, so callers need only one import path.
pub use quarry_core;
