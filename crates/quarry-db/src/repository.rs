//! # Query Repository
//!
//! Generic data access for one entity type, handed out by a unit of work.
//!
//! ## Operations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     QueryRepository<T>                                  │
//! │                                                                         │
//! │  Staging (sync, no store I/O)       Reads (async, cancellable)          │
//! │  ├── add(entity)                    ├── get(key)                        │
//! │  └── validate(&entity)              ├── exists(predicate?)              │
//! │                                     ├── get_all()                       │
//! │  Staging (async, checks the store)  ├── get_first(predicate, includes)  │
//! │  ├── update(entity)                 └── query(&QueryRequest)            │
//! │  └── remove(key)                                                        │
//! │                                     Lazy views (Query<T>)               │
//! │                                     ├── all()                           │
//! │                                     ├── get_all_where(p, includes)      │
//! │                                     ├── get_filtered(search, p?, incl.) │
//! │                                     └── get_filtered_by(prop, v, op)    │
//! │                                                                         │
//! │  Staged changes are written by UnitOfWork::commit().                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Configuration errors (bad property, operator, key arity, relation name)
//! are raised before the store is touched. Store failures are logged and
//! returned unchanged.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use quarry_core::{
    describe, predicate, validate, Entity, EntityDescriptor, FilterOp, Predicate, QueryPage,
    QueryRequest, ValidationReport, Value,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{observed, DbError, DbResult};
use crate::query::Query;
use crate::session::{cancellable, Session};
use crate::store;
use crate::tracking::{EntryState, Tracked};

/// Repository for entities of type `T`.
///
/// Obtained from [`crate::UnitOfWork::repository`]; shares the unit of
/// work's connection and identity map.
pub struct QueryRepository<T> {
    session: Arc<Session>,
    descriptor: Arc<EntityDescriptor>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for QueryRepository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRepository")
            .field("entity", &self.descriptor.name())
            .field("session", &self.session.id())
            .finish()
    }
}

impl<T: Entity> QueryRepository<T> {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        QueryRepository {
            session,
            descriptor: describe::<T>(),
            _entity: PhantomData,
        }
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    /// Checks required fields, enum values and property types.
    pub fn validate(&self, entity: &T) -> ValidationReport {
        validate(entity)
    }

    // =========================================================================
    // Staging
    // =========================================================================

    /// Stages an insert and starts tracking the entity.
    ///
    /// ## Errors
    /// - `Validation` if the entity is invalid
    /// - `UniqueViolation` if an entity with the same key is already tracked
    ///   (a key that is only stored fails at commit instead)
    pub fn add(&self, entity: T) -> DbResult<Tracked<T>> {
        let result = self.stage_add(entity);
        observed(result, "add", T::NAME)
    }

    fn stage_add(&self, entity: T) -> DbResult<Tracked<T>> {
        self.session.ensure_open()?;
        validate(&entity).into_result()?;
        let key = self.descriptor.key_of(&entity)?;

        let mut tracker = self.session.tracker();
        match tracker.state_of(T::NAME, &key) {
            Some(EntryState::Deleted) => {
                // delete + add of the same key within one unit of work
                debug!(entity = T::NAME, %key, "Re-adding deleted entity");
                Ok(tracker.replace(key, entity)?)
            }
            Some(_) => Err(DbError::duplicate(format!("{} key", T::NAME), key)),
            None => {
                debug!(entity = T::NAME, %key, "Staging insert");
                Ok(tracker.attach(key, entity, EntryState::Added)?)
            }
        }
    }

    /// Stages an update of a stored (or tracked) entity.
    ///
    /// ## Errors
    /// - `Validation` if the entity is invalid
    /// - `NotFound` if no entity with that key exists
    pub async fn update(&self, entity: T, cancel: &CancellationToken) -> DbResult<Tracked<T>> {
        let result = async {
            self.session.ensure_open()?;
            validate(&entity).into_result()?;
            let key = self.descriptor.key_of(&entity)?;

            let state = self.session.tracker().state_of(T::NAME, &key);
            match state {
                Some(EntryState::Deleted) => return Err(DbError::not_found(T::NAME, key)),
                Some(_) => {}
                None => {
                    if !self.stored(&key, cancel).await? {
                        return Err(DbError::not_found(T::NAME, key));
                    }
                }
            }

            debug!(entity = T::NAME, %key, "Staging update");
            Ok(self.session.tracker().replace(key, entity)?)
        }
        .await;
        observed(result, "update", T::NAME)
    }

    /// Stages a delete by primary key.
    ///
    /// ## Errors
    /// - `KeyArity` / `TypeMismatch` for a malformed key
    /// - `NotFound` if no entity with that key exists
    pub async fn remove(&self, key: &[Value], cancel: &CancellationToken) -> DbResult<()> {
        let result = async {
            self.session.ensure_open()?;
            let key = self.descriptor.encode_key(key)?;

            let state = self.session.tracker().state_of(T::NAME, &key);
            match state {
                Some(EntryState::Deleted) => return Err(DbError::not_found(T::NAME, key)),
                Some(_) => {}
                None => {
                    let row = self.fetch_row(&key, cancel).await?;
                    let Some(row) = row else {
                        return Err(DbError::not_found(T::NAME, key));
                    };
                    let entity: T = decode(&row)?;
                    self.session.tracker().track_existing(key.clone(), entity)?;
                }
            }

            debug!(entity = T::NAME, %key, "Staging delete");
            self.session.tracker().mark_deleted(T::NAME, &key);
            Ok(())
        }
        .await;
        observed(result, "remove", T::NAME)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Looks an entity up by primary key, tracked entries first.
    ///
    /// The result is a detached copy.
    pub async fn get(&self, key: &[Value], cancel: &CancellationToken) -> DbResult<Option<T>> {
        let result = async {
            self.session.ensure_open()?;
            let key = self.descriptor.encode_key(key)?;

            let tracked = self.session.tracker().find::<T>(&key);
            if let Some((handle, state)) = tracked {
                return Ok(match state {
                    EntryState::Deleted => None,
                    _ => Some(handle.snapshot()),
                });
            }

            match self.fetch_row(&key, cancel).await? {
                Some(row) => Ok(Some(decode(&row)?)),
                None => Ok(None),
            }
        }
        .await;
        observed(result, "get", T::NAME)
    }

    /// Returns true if any stored entity matches (any entity at all for
    /// `None`).
    pub async fn exists(
        &self,
        predicate: Option<Predicate<T>>,
        cancel: &CancellationToken,
    ) -> DbResult<bool> {
        let query = match predicate {
            Some(p) => self.all()?.filter(p),
            None => self.all()?,
        };
        query.any(cancel).await
    }

    /// Every stored entity, in store order, untracked.
    pub async fn get_all(&self, cancel: &CancellationToken) -> DbResult<Vec<T>> {
        self.all()?.to_vec(cancel).await
    }

    /// First match in store order.
    pub async fn get_first(
        &self,
        predicate: Predicate<T>,
        includes: &[&str],
        cancel: &CancellationToken,
    ) -> DbResult<Option<T>> {
        self.get_all_where(predicate, includes)?.first(cancel).await
    }

    /// Executes a declarative request: declared filters, search, sortable
    /// ordering and paging capped at the configured page size.
    pub async fn query(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> DbResult<QueryPage<T>> {
        let prepared = (|| {
            self.session.ensure_open()?;
            let page = request.page_request(self.session.config().max_page_size)?;
            let plan = request.plan::<T>()?;
            Ok::<_, DbError>((page, plan))
        })();
        let (page, plan) = observed(prepared, "query", T::NAME)?;

        debug!(
            entity = T::NAME,
            filters = request.filters.len(),
            search = request.search.as_deref().unwrap_or_default(),
            page = page.page(),
            size = page.size(),
            "Executing query request"
        );

        self.all()?
            .filter(plan.filter)
            .filter(plan.search)
            .with_order(plan.order)
            .page(page, cancel)
            .await
    }

    // =========================================================================
    // Lazy Views
    // =========================================================================

    /// Unfiltered view of the collection.
    pub fn all(&self) -> DbResult<Query<T>> {
        self.session.ensure_open()?;
        Ok(Query::new(Arc::clone(&self.session)))
    }

    /// Filtered view with relations to include. Detached unless
    /// [`Query::tracked`] is called.
    pub fn get_all_where(&self, predicate: Predicate<T>, includes: &[&str]) -> DbResult<Query<T>> {
        let query = self.all()?.filter(predicate).include_all(includes);
        observed(query, "get_all_where", T::NAME)
    }

    /// `predicate` first, then a free-text search over searchable fields.
    /// A blank term leaves the predicate alone.
    pub fn get_filtered(
        &self,
        search: &str,
        predicate: Option<Predicate<T>>,
        includes: &[&str],
    ) -> DbResult<Query<T>> {
        let query = self
            .get_all_where(predicate.unwrap_or_else(Predicate::always), includes)
            .and_then(|q| q.search(search));
        observed(query, "get_filtered", T::NAME)
    }

    /// Single-property ad hoc filter.
    ///
    /// ## Errors
    /// Configuration errors for an unknown property or an operator that does
    /// not fit the property type or value.
    pub fn get_filtered_by(
        &self,
        property: &str,
        value: impl Into<Value>,
        op: FilterOp,
    ) -> DbResult<Query<T>> {
        let query = predicate::compare::<T>(property, op, value)
            .map_err(DbError::from)
            .and_then(|p| Ok(self.all()?.filter(p)));
        observed(query, "get_filtered_by", T::NAME)
    }

    // =========================================================================
    // Store Helpers
    // =========================================================================

    async fn fetch_row(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> DbResult<Option<store::DocumentRow>> {
        let mut conn = self.session.connection().await?;
        cancellable(cancel, "get", store::fetch_one(&mut conn, T::NAME, key)).await
    }

    async fn stored(&self, key: &str, cancel: &CancellationToken) -> DbResult<bool> {
        let mut conn = self.session.connection().await?;
        cancellable(cancel, "get", store::contains_key(&mut conn, T::NAME, key)).await
    }
}

fn decode<T: Entity>(row: &store::DocumentRow) -> DbResult<T> {
    let json = row.json(T::NAME)?;
    Ok(serde_json::from_value(json).map_err(|e| quarry_core::CoreError::serialization(T::NAME, e))?)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{membership, owner, project, seeded, Membership, Owner, Project};
    use quarry_core::{CoreError, ErrorKind, FilterSpec};

    #[tokio::test]
    async fn test_add_commit_get_round_trip() {
        let (db, uow) = seeded().await;
        let cancel = CancellationToken::new();
        let repo = uow.repository::<Owner>().unwrap();

        let added = owner(7, "Kestrel", Some("k@kestrel.dev"));
        repo.add(added.clone()).unwrap();
        uow.commit(&cancel).await.unwrap();
        uow.dispose().await;

        let reader = db.unit_of_work().await.unwrap();
        let repo = reader.repository::<Owner>().unwrap();
        let mut fetched = repo.get(&[7.into()], &cancel).await.unwrap().unwrap();
        assert_eq!(fetched, added);

        // detached: edits go nowhere
        fetched.name = "changed".to_string();
        let summary = reader.commit(&cancel).await.unwrap();
        assert_eq!(summary.total(), 0);
        let again = repo.get(&[7.into()], &cancel).await.unwrap().unwrap();
        assert_eq!(again.name, "Kestrel");
    }

    #[tokio::test]
    async fn test_add_rejects_tracked_duplicate_and_invalid() {
        let (_db, uow) = seeded().await;
        let repo = uow.repository::<Owner>().unwrap();

        repo.add(owner(8, "Osprey", None)).unwrap();
        let err = repo.add(owner(8, "Osprey again", None)).unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        let err = repo.add(owner(9, "", None)).unwrap_err();
        match err {
            DbError::Core(CoreError::Validation(report)) => {
                assert_eq!(report.errors_for("name").count(), 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stored_duplicate_fails_at_commit() {
        let (_db, uow) = seeded().await;
        let cancel = CancellationToken::new();
        let repo = uow.repository::<Owner>().unwrap();

        repo.add(owner(1, "Acme again", None)).unwrap();
        let err = uow.commit(&cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(matches!(err, DbError::UniqueViolation { ref value, .. } if value == "[1]"));
    }

    #[tokio::test]
    async fn test_get_unknown_key_and_bad_arity() {
        let (_db, uow) = seeded().await;
        let cancel = CancellationToken::new();
        let repo = uow.repository::<Owner>().unwrap();

        assert!(repo.get(&[99.into()], &cancel).await.unwrap().is_none());

        let err = repo.get(&[1.into(), 2.into()], &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::KeyArity {
                expected: 1,
                actual: 2,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_composite_key_lookup() {
        let (_db, uow) = seeded().await;
        let cancel = CancellationToken::new();
        let repo = uow.repository::<Membership>().unwrap();

        repo.add(membership(1, 10, "lead")).unwrap();
        repo.add(membership(2, 10, "viewer")).unwrap();
        uow.commit(&cancel).await.unwrap();

        let found = repo.get(&[2.into(), 10.into()], &cancel).await.unwrap().unwrap();
        assert_eq!(found.role, "viewer");
        assert!(repo.get(&[10.into(), 2.into()], &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_missing_key_is_not_found() {
        let (_db, uow) = seeded().await;
        let cancel = CancellationToken::new();
        let repo = uow.repository::<Owner>().unwrap();

        let err = repo.remove(&[42.into()], &cancel).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { ref id, .. } if id == "[42]"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_remove_then_commit_deletes() {
        let (_db, uow) = seeded().await;
        let cancel = CancellationToken::new();
        let repo = uow.repository::<Project>().unwrap();

        repo.remove(&[13.into()], &cancel).await.unwrap();
        assert!(repo.get(&[13.into()], &cancel).await.unwrap().is_none());

        let err = repo.remove(&[13.into()], &cancel).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));

        let summary = uow.commit(&cancel).await.unwrap();
        assert_eq!(summary.deleted, 1);
        assert_eq!(repo.get_all(&cancel).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_update_checks_existence() {
        let (_db, uow) = seeded().await;
        let cancel = CancellationToken::new();
        let repo = uow.repository::<Project>().unwrap();

        let err = repo
            .update(project(99, "Ghost", 1, 0), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));

        let mut apollo = repo.get(&[10.into()], &cancel).await.unwrap().unwrap();
        apollo.budget = 650;
        repo.update(apollo, &cancel).await.unwrap();
        let summary = uow.commit(&cancel).await.unwrap();
        assert_eq!(summary.updated, 1);

        let stored = repo.get(&[10.into()], &cancel).await.unwrap().unwrap();
        assert_eq!(stored.budget, 650);
    }

    #[tokio::test]
    async fn test_exists_matches_filtered_query() {
        let (_db, uow) = seeded().await;
        let cancel = CancellationToken::new();
        let repo = uow.repository::<Project>().unwrap();

        for threshold in [100, 600, 900] {
            let p = predicate::greater_than::<Project>("budget", threshold).unwrap();
            let exists = repo.exists(Some(p.clone()), &cancel).await.unwrap();
            let listed = repo.get_all_where(p, &[]).unwrap().to_vec(&cancel).await.unwrap();
            assert_eq!(exists, !listed.is_empty(), "threshold {threshold}");
        }
        assert!(repo.exists(None, &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_blank_search_equals_get_all_where() {
        let (_db, uow) = seeded().await;
        let cancel = CancellationToken::new();
        let repo = uow.repository::<Project>().unwrap();
        let p = predicate::equals::<Project>("owner_id", 1).unwrap();

        let searched = repo
            .get_filtered("   ", Some(p.clone()), &[])
            .unwrap()
            .to_vec(&cancel)
            .await
            .unwrap();
        let filtered = repo.get_all_where(p, &[]).unwrap().to_vec(&cancel).await.unwrap();
        assert_eq!(searched, filtered);
        assert_eq!(searched.len(), 2);
    }

    #[tokio::test]
    async fn test_search_is_duplicate_free_union() {
        let (_db, uow) = seeded().await;
        let cancel = CancellationToken::new();
        let repo = uow.repository::<Project>().unwrap();

        // "co" hits Comet by name and Beacon by tag "core"; Comet's tag also matches
        let ids: Vec<i64> = repo
            .get_filtered("co", None, &[])
            .unwrap()
            .to_vec(&cancel)
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![11, 12]);
    }

    #[tokio::test]
    async fn test_get_filtered_by() {
        let (_db, uow) = seeded().await;
        let cancel = CancellationToken::new();
        let repo = uow.repository::<Project>().unwrap();

        let big = repo
            .get_filtered_by("budget", 300, FilterOp::GreaterOrEqual)
            .unwrap()
            .count(&cancel)
            .await
            .unwrap();
        assert_eq!(big, 3);

        let everything = repo
            .get_filtered_by("name", Value::Null, FilterOp::Contains)
            .unwrap()
            .count(&cancel)
            .await
            .unwrap();
        assert_eq!(everything, 4);

        let err = repo
            .get_filtered_by("budget", "lots", FilterOp::Equals)
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::TypeMismatch { .. })));

        let err = repo
            .get_filtered_by("missing", 1, FilterOp::Equals)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_get_first_with_include() {
        let (_db, uow) = seeded().await;
        let cancel = CancellationToken::new();
        let repo = uow.repository::<Project>().unwrap();

        let p = predicate::equals::<Project>("owner_id", 2).unwrap();
        let comet = repo.get_first(p, &["owner"], &cancel).await.unwrap().unwrap();
        assert_eq!(comet.id, 12);
        assert_eq!(comet.owner.map(|o| o.name), Some("acorn".to_string()));

        let nothing = predicate::equals::<Project>("owner_id", 77).unwrap();
        assert!(repo.get_first(nothing, &[], &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_filter_through_relation_path() {
        let (_db, uow) = seeded().await;
        let cancel = CancellationToken::new();
        let repo = uow.repository::<Project>().unwrap();

        let p = predicate::contains::<Project>("owner.name", "ZE").unwrap();
        let ids: Vec<i64> = repo
            .get_all_where(p, &["owner"])
            .unwrap()
            .to_vec(&cancel)
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![13]);
    }

    #[tokio::test]
    async fn test_query_request() {
        let (_db, uow) = seeded().await;
        let cancel = CancellationToken::new();
        let repo = uow.repository::<Project>().unwrap();

        let request = QueryRequest {
            page: Some(1),
            page_size: Some(2),
            search: None,
            order: Some("budget:desc".to_string()),
            filters: vec![FilterSpec::new("status", FilterOp::Equals, "active")],
        };
        let page = repo.query(&request, &cancel).await.unwrap();
        assert_eq!(page.total, 3);
        let ids: Vec<i64> = page.items.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![12, 10]);

        let unsortable = QueryRequest {
            order: Some("tag".to_string()),
            ..QueryRequest::default()
        };
        let err = repo.query(&unsortable, &cancel).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::NotSortable { .. })));

        let undeclared = QueryRequest {
            filters: vec![FilterSpec::new("budget", FilterOp::LessThan, 100)],
            ..QueryRequest::default()
        };
        let err = repo.query(&undeclared, &cancel).await.unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::NotFilterable { .. })));
    }

    #[tokio::test]
    async fn test_disposed_repository_fails_fast() {
        let (_db, uow) = seeded().await;
        let cancel = CancellationToken::new();
        let repo = uow.repository::<Owner>().unwrap();
        uow.dispose().await;

        assert!(matches!(repo.get_all(&cancel).await, Err(DbError::Disposed)));
        assert!(matches!(repo.add(owner(5, "Late", None)), Err(DbError::Disposed)));
        assert!(matches!(repo.all(), Err(DbError::Disposed)));
    }
}
