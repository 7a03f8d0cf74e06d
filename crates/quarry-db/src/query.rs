//! # Queries
//!
//! A lazy, composable view over one entity collection.
//!
//! ## Execution
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  repo.get_all_where(p, &["owner"])?.search("ac")?.order_by("owner.name")│
//! │       │  (nothing touches the store until a materializer runs)          │
//! │       ▼                                                                 │
//! │  to_vec / first / count / any / page                                   │
//! │       │                                                                 │
//! │       ├── 1. fetch collection documents (store order)                  │
//! │       ├── 2. decode into T                                             │
//! │       ├── 3. load includes + relations named by order roots            │
//! │       ├── 4. keep entities matching filter AND search                  │
//! │       ├── 5. stable sort                                               │
//! │       └── 6. Detached → T  |  Attached → Tracked<T> (identity map)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every materialization re-reads the store; nothing is cached.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use quarry_core::relation::decode_all;
use quarry_core::{
    describe, find_relation, predicate, Entity, OrderBy, OrderSpec, PageRequest, Predicate,
    QueryPage, Relation,
};
use sqlx::SqliteConnection;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{observed, DbError, DbResult};
use crate::session::{cancellable, Session};
use crate::store;
use crate::tracking::Tracked;

// =============================================================================
// Tracking Modes
// =============================================================================

mod sealed {
    pub trait Sealed {}
}

/// How materialized entities are handed out.
pub trait TrackingMode: sealed::Sealed + Send + Sync + 'static {
    type Item<T: Entity>;

    #[doc(hidden)]
    fn wrap<T: Entity>(session: &Session, items: Vec<T>) -> DbResult<Vec<Self::Item<T>>>;
}

/// Plain values, not tracked by the unit of work. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;

/// Tracked handles; edits are written by the next commit.
#[derive(Debug, Clone, Copy, Default)]
pub struct Attached;

impl sealed::Sealed for Detached {}
impl sealed::Sealed for Attached {}

impl TrackingMode for Detached {
    type Item<T: Entity> = T;

    fn wrap<T: Entity>(_session: &Session, items: Vec<T>) -> DbResult<Vec<T>> {
        Ok(items)
    }
}

impl TrackingMode for Attached {
    type Item<T: Entity> = Tracked<T>;

    fn wrap<T: Entity>(session: &Session, items: Vec<T>) -> DbResult<Vec<Tracked<T>>> {
        let descriptor = describe::<T>();
        let mut tracker = session.tracker();
        let mut tracked = Vec::with_capacity(items.len());
        for entity in items {
            let key = descriptor.key_of(&entity)?;
            tracked.push(tracker.track_existing(key, entity)?);
        }
        Ok(tracked)
    }
}

// =============================================================================
// Query
// =============================================================================

/// Filtered, searched, ordered view of the `T` collection.
pub struct Query<T, M = Detached> {
    session: Arc<Session>,
    filter: Predicate<T>,
    includes: Vec<Relation<T>>,
    order: OrderBy<T>,
    _mode: PhantomData<M>,
}

impl<T, M> Clone for Query<T, M> {
    fn clone(&self) -> Self {
        Query {
            session: Arc::clone(&self.session),
            filter: self.filter.clone(),
            includes: self.includes.clone(),
            order: self.order.clone(),
            _mode: PhantomData,
        }
    }
}

impl<T, M> fmt::Debug for Query<T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("session", &self.session.id())
            .field("filter", &self.filter)
            .field("includes", &self.includes.iter().map(Relation::name).collect::<Vec<_>>())
            .field("order", &self.order)
            .finish()
    }
}

impl<T: Entity> Query<T, Detached> {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Query {
            session,
            filter: Predicate::always(),
            includes: Vec::new(),
            order: OrderBy::default(),
            _mode: PhantomData,
        }
    }

    /// Hands out tracked handles instead of detached values.
    pub fn tracked(self) -> Query<T, Attached> {
        Query {
            session: self.session,
            filter: self.filter,
            includes: self.includes,
            order: self.order,
            _mode: PhantomData,
        }
    }
}

impl<T: Entity, M: TrackingMode> Query<T, M> {
    /// ANDs a predicate onto the query.
    pub fn filter(mut self, predicate: Predicate<T>) -> Self {
        self.filter = self.filter.and(predicate);
        self
    }

    /// ANDs a free-text search onto the query. A blank term changes nothing.
    pub fn search(self, term: &str) -> DbResult<Self> {
        let search = predicate::search::<T>(term)?;
        Ok(self.filter(search))
    }

    /// Loads a declared relation on materialization. Repeats are ignored.
    pub fn include(mut self, relation: &str) -> DbResult<Self> {
        let relation = find_relation::<T>(relation)?;
        if !self.includes.iter().any(|r| r.name() == relation.name()) {
            self.includes.push(relation);
        }
        Ok(self)
    }

    pub fn include_all(self, relations: &[&str]) -> DbResult<Self> {
        relations.iter().try_fold(self, |query, name| query.include(name))
    }

    /// Replaces the ordering with a single key.
    pub fn order_by(mut self, spec: impl Into<OrderSpec>) -> DbResult<Self> {
        self.order = OrderBy::new(spec)?;
        Ok(self)
    }

    /// Adds a tie-breaking key.
    pub fn then_by(mut self, spec: impl Into<OrderSpec>) -> DbResult<Self> {
        self.order = self.order.then(spec)?;
        Ok(self)
    }

    pub fn with_order(mut self, order: OrderBy<T>) -> Self {
        self.order = order;
        self
    }

    // =========================================================================
    // Materializers
    // =========================================================================

    pub async fn to_vec(&self, cancel: &CancellationToken) -> DbResult<Vec<M::Item<T>>> {
        let result = async {
            let items = self.execute(true, cancel).await?;
            M::wrap(&self.session, items)
        }
        .await;
        observed(result, "query", T::NAME)
    }

    /// First entity in final order.
    pub async fn first(&self, cancel: &CancellationToken) -> DbResult<Option<M::Item<T>>> {
        let result = async {
            let mut items = self.execute(true, cancel).await?;
            items.truncate(1);
            Ok::<_, DbError>(M::wrap(&self.session, items)?.into_iter().next())
        }
        .await;
        observed(result, "first", T::NAME)
    }

    pub async fn count(&self, cancel: &CancellationToken) -> DbResult<usize> {
        let result = self.execute(false, cancel).await.map(|items| items.len());
        observed(result, "count", T::NAME)
    }

    pub async fn any(&self, cancel: &CancellationToken) -> DbResult<bool> {
        let result = self.execute(false, cancel).await.map(|items| !items.is_empty());
        observed(result, "any", T::NAME)
    }

    /// One page of the final order; `total` counts the whole result.
    pub async fn page(
        &self,
        request: PageRequest,
        cancel: &CancellationToken,
    ) -> DbResult<QueryPage<M::Item<T>>> {
        let result = async {
            let page = QueryPage::from_sorted(self.execute(true, cancel).await?, request);
            Ok::<_, DbError>(QueryPage {
                total: page.total,
                page: page.page,
                page_size: page.page_size,
                items: M::wrap(&self.session, page.items)?,
            })
        }
        .await;
        observed(result, "page", T::NAME)
    }

    async fn execute(&self, sorted: bool, cancel: &CancellationToken) -> DbResult<Vec<T>> {
        let mut guard = self.session.connection().await?;
        let conn: &mut SqliteConnection = &mut guard;

        let mut items = decode_rows::<T>(
            cancellable(cancel, "query", store::fetch_collection(conn, T::NAME)).await?,
        )?;
        let fetched = items.len();

        let mut documents: HashMap<&'static str, Vec<serde_json::Value>> = HashMap::new();
        for relation in self.relations_to_load() {
            if !documents.contains_key(relation.target()) {
                let rows =
                    cancellable(cancel, "include", store::fetch_collection(conn, relation.target()))
                        .await?;
                documents.insert(relation.target(), documents_of(&rows, relation.target())?);
            }
            let related = documents.get(relation.target()).cloned().unwrap_or_default();
            relation.load(&mut items, related)?;
        }

        items.retain(|entity| self.filter.matches(entity));
        if sorted {
            self.order.sort(&mut items);
        }

        debug!(
            entity = T::NAME,
            fetched,
            matched = items.len(),
            includes = self.includes.len(),
            order = ?self.order,
            "Query executed"
        );
        Ok(items)
    }

    /// Explicit includes followed by relations that filter and order paths
    /// start at.
    fn relations_to_load(&self) -> Vec<Relation<T>> {
        let mut relations = self.includes.clone();
        for root in self.filter.roots().chain(self.order.roots()) {
            if relations.iter().any(|r| r.name() == root) {
                continue;
            }
            if let Ok(relation) = find_relation::<T>(root) {
                relations.push(relation);
            }
        }
        relations
    }
}

fn documents_of(rows: &[store::DocumentRow], collection: &str) -> DbResult<Vec<serde_json::Value>> {
    rows.iter().map(|row| row.json(collection)).collect()
}

fn decode_rows<T: Entity>(rows: Vec<store::DocumentRow>) -> DbResult<Vec<T>> {
    Ok(decode_all::<T>(documents_of(&rows, T::NAME)?)?)
}

// =============================================================================
// Unit Tests
// =============================================================================
