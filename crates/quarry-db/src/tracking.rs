//! # Change Tracking
//!
//! Identity map and staged changes of one unit of work.
//!
//! ## Entry Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   add()            query().tracked()        update()        remove()    │
//! │     │                    │                     │               │        │
//! │     ▼                    ▼                     ▼               ▼        │
//! │  ┌───────┐          ┌───────────┐        ┌──────────┐    ┌─────────┐   │
//! │  │ Added │          │ Unchanged │──edit─►│ Modified │    │ Deleted │   │
//! │  └───┬───┘          └─────▲─────┘        └────┬─────┘    └────┬────┘   │
//! │      │ commit             │ commit            │ commit        │commit  │
//! │      └────────────────────┴───────────────────┘               ▼        │
//! │                                                           (forgotten)  │
//! │                                                                         │
//! │  Unchanged entries are compared against their original document at    │
//! │  commit; a tracked handle that was edited in place becomes an update.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Inside an explicit transaction a commit only reaches the store when the
//! transaction commits. The tracker journals the entries each such commit
//! accepts so a rollback can [`rewind`](ChangeTracker::rewind) them to
//! their staged state.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use quarry_core::{describe, CoreError, CoreResult, Entity};

// =============================================================================
// Tracked Handle
// =============================================================================

/// Shared handle to an entity attached to a unit of work.
///
/// Clones point at the same entity. Edits made through [`Tracked::write`]
/// are written by the next commit.
pub struct Tracked<T>(Arc<RwLock<T>>);

impl<T> Tracked<T> {
    fn new(entity: T) -> Self {
        Tracked(Arc::new(RwLock::new(entity)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write()
    }

    /// Returns true if both handles point at the same tracked entity.
    pub fn ptr_eq(&self, other: &Tracked<T>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone> Tracked<T> {
    /// Detached copy of the current state.
    pub fn snapshot(&self) -> T {
        self.0.read().clone()
    }
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Tracked(Arc::clone(&self.0))
    }
}

impl<T: fmt::Debug> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tracked").field(&*self.0.read()).finish()
    }
}

// =============================================================================
// Entries
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Added,
    Unchanged,
    Modified,
    Deleted,
}

/// A write produced by change detection.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    Insert {
        entry: u64,
        collection: &'static str,
        key: String,
        body: serde_json::Value,
    },
    Update {
        entry: u64,
        collection: &'static str,
        key: String,
        body: serde_json::Value,
    },
    Delete {
        entry: u64,
        collection: &'static str,
        key: String,
    },
}

impl PendingWrite {
    pub fn entry(&self) -> u64 {
        match self {
            PendingWrite::Insert { entry, .. }
            | PendingWrite::Update { entry, .. }
            | PendingWrite::Delete { entry, .. } => *entry,
        }
    }
}

/// Type-erased view of an [`Entry`].
trait EntryOps: Send + Sync {
    fn collection(&self) -> &'static str;
    fn key(&self) -> &str;
    fn state(&self) -> EntryState;
    fn set_state(&mut self, state: EntryState);
    fn detect(&self, id: u64) -> CoreResult<Option<PendingWrite>>;
    fn saved(&mut self, body: serde_json::Value);
    fn boxed_clone(&self) -> Box<dyn EntryOps>;
    fn as_any(&self) -> &dyn Any;
}

struct Entry<T> {
    key: String,
    state: EntryState,
    handle: Tracked<T>,
    original: serde_json::Value,
}

impl<T: Entity> EntryOps for Entry<T> {
    fn collection(&self) -> &'static str {
        T::NAME
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn state(&self) -> EntryState {
        self.state
    }

    fn set_state(&mut self, state: EntryState) {
        self.state = state;
    }

    fn detect(&self, id: u64) -> CoreResult<Option<PendingWrite>> {
        if self.state == EntryState::Deleted {
            return Ok(Some(PendingWrite::Delete {
                entry: id,
                collection: T::NAME,
                key: self.key.clone(),
            }));
        }

        let entity = self.handle.read();
        let key = describe::<T>().key_of(&*entity)?;
        if key != self.key {
            return Err(CoreError::KeyChanged {
                entity: T::NAME.to_string(),
                from: self.key.clone(),
                to: key,
            });
        }
        let body =
            serde_json::to_value(&*entity).map_err(|e| CoreError::serialization(T::NAME, e))?;

        let write = match self.state {
            EntryState::Added => Some(PendingWrite::Insert {
                entry: id,
                collection: T::NAME,
                key,
                body,
            }),
            EntryState::Unchanged if body == self.original => None,
            _ => Some(PendingWrite::Update {
                entry: id,
                collection: T::NAME,
                key,
                body,
            }),
        };
        Ok(write)
    }

    fn saved(&mut self, body: serde_json::Value) {
        self.original = body;
        self.state = EntryState::Unchanged;
    }

    fn boxed_clone(&self) -> Box<dyn EntryOps> {
        Box::new(Entry {
            key: self.key.clone(),
            state: self.state,
            handle: self.handle.clone(),
            original: self.original.clone(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// =============================================================================
// Change Tracker
// =============================================================================

/// Identity map keyed by `(collection, key)`.
#[derive(Default)]
pub struct ChangeTracker {
    next_id: u64,
    entries: BTreeMap<u64, Box<dyn EntryOps>>,
    index: HashMap<(&'static str, String), u64>,
    /// Entries as they were before each accept, while a journal is open.
    journal: Option<Vec<(u64, Box<dyn EntryOps>)>>,
}

impl fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .values()
                    .map(|e| (format!("{}{}", e.collection(), e.key()), e.state())),
            )
            .finish()
    }
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tracked handle and state for a key, if `T` with that key is tracked.
    pub fn find<T: Entity>(&self, key: &str) -> Option<(Tracked<T>, EntryState)> {
        let id = self.index.get(&(T::NAME, key.to_string()))?;
        let entry = self.entries.get(id)?;
        entry
            .as_any()
            .downcast_ref::<Entry<T>>()
            .map(|e| (e.handle.clone(), e.state))
    }

    pub fn state_of(&self, collection: &'static str, key: &str) -> Option<EntryState> {
        self.index
            .get(&(collection, key.to_string()))
            .and_then(|id| self.entries.get(id))
            .map(|e| e.state())
    }

    /// Starts tracking an entity under `key`. Replaces any previous entry
    /// for the same key.
    pub fn attach<T: Entity>(
        &mut self,
        key: String,
        entity: T,
        state: EntryState,
    ) -> CoreResult<Tracked<T>> {
        let original =
            serde_json::to_value(&entity).map_err(|e| CoreError::serialization(T::NAME, e))?;
        let handle = Tracked::new(entity);

        if let Some(old) = self.index.remove(&(T::NAME, key.clone())) {
            self.entries.remove(&old);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.index.insert((T::NAME, key.clone()), id);
        self.entries.insert(
            id,
            Box::new(Entry {
                key,
                state,
                handle: handle.clone(),
                original,
            }),
        );
        Ok(handle)
    }

    /// Identity resolution for entities read from the store: an entity that
    /// is already tracked keeps its tracked handle and in-memory state.
    pub fn track_existing<T: Entity>(&mut self, key: String, entity: T) -> CoreResult<Tracked<T>> {
        if let Some((handle, _)) = self.find::<T>(&key) {
            return Ok(handle);
        }
        self.attach(key, entity, EntryState::Unchanged)
    }

    /// Overwrites a tracked entity (or starts tracking it) and flags it for
    /// update. An entity still waiting to be inserted stays `Added`.
    pub fn replace<T: Entity>(&mut self, key: String, entity: T) -> CoreResult<Tracked<T>> {
        match self.find::<T>(&key) {
            Some((handle, state)) => {
                *handle.write() = entity;
                if state != EntryState::Added {
                    self.set_state(T::NAME, &key, EntryState::Modified);
                }
                Ok(handle)
            }
            None => self.attach(key, entity, EntryState::Modified),
        }
    }

    pub fn set_state(&mut self, collection: &'static str, key: &str, state: EntryState) -> bool {
        let Some(id) = self.index.get(&(collection, key.to_string())) else {
            return false;
        };
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.set_state(state);
                true
            }
            None => false,
        }
    }

    /// Stages a delete. An entry that was never saved is simply forgotten.
    pub fn mark_deleted(&mut self, collection: &'static str, key: &str) -> bool {
        match self.state_of(collection, key) {
            Some(EntryState::Added) => {
                if let Some(id) = self.index.remove(&(collection, key.to_string())) {
                    self.entries.remove(&id);
                }
                true
            }
            Some(_) => self.set_state(collection, key, EntryState::Deleted),
            None => false,
        }
    }

    /// Writes needed to persist every tracked change, in tracking order.
    pub fn pending(&self) -> CoreResult<Vec<PendingWrite>> {
        let mut writes = Vec::new();
        for (id, entry) in &self.entries {
            if let Some(write) = entry.detect(*id)? {
                writes.push(write);
            }
        }
        Ok(writes)
    }

    pub fn has_changes(&self) -> bool {
        self.pending().map(|w| !w.is_empty()).unwrap_or(true)
    }

    /// Marks committed writes as saved; deleted entries are forgotten.
    pub fn accept(&mut self, writes: &[PendingWrite]) {
        if let Some(journal) = self.journal.as_mut() {
            for write in writes {
                if let Some(entry) = self.entries.get(&write.entry()) {
                    journal.push((write.entry(), entry.boxed_clone()));
                }
            }
        }

        for write in writes {
            match write {
                PendingWrite::Insert { entry, body, .. } | PendingWrite::Update { entry, body, .. } => {
                    if let Some(e) = self.entries.get_mut(entry) {
                        e.saved(body.clone());
                    }
                }
                PendingWrite::Delete {
                    entry,
                    collection,
                    key,
                } => {
                    self.entries.remove(entry);
                    self.index.remove(&(*collection, key.clone()));
                }
            }
        }
    }

    /// Starts recording accepted writes so they can be rewound.
    pub fn open_journal(&mut self) {
        self.journal = Some(Vec::new());
    }

    /// Keeps every write accepted since [`open_journal`](Self::open_journal).
    pub fn close_journal(&mut self) {
        self.journal = None;
    }

    /// Puts every entry accepted since the journal opened back into the
    /// state it had before, newest first. Edits made to tracked handles in
    /// the meantime are kept and show up as updates.
    pub fn rewind(&mut self) -> usize {
        let Some(journal) = self.journal.take() else {
            return 0;
        };
        let restored = journal.len();

        for (id, entry) in journal.into_iter().rev() {
            let slot = (entry.collection(), entry.key().to_string());
            if let Some(other) = self.index.insert(slot, id) {
                if other != id {
                    self.entries.remove(&other);
                }
            }
            self.entries.insert(id, entry);
        }
        restored
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.journal = None;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{owner, Owner};
    use quarry_core::Model;

    fn key(id: i64) -> String {
        format!("[{id}]")
    }

    #[test]
    fn test_unchanged_entry_has_no_write() {
        let mut tracker = ChangeTracker::new();
        tracker
            .attach(key(1), owner(1, "Acme", None), EntryState::Unchanged)
            .unwrap();

        assert!(tracker.pending().unwrap().is_empty());
        assert!(!tracker.has_changes());
    }

    #[test]
    fn test_edit_through_handle_is_detected() {
        let mut tracker = ChangeTracker::new();
        let handle = tracker
            .attach(key(1), owner(1, "Acme", None), EntryState::Unchanged)
            .unwrap();

        handle.write().name = "Acme Corp".to_string();

        let writes = tracker.pending().unwrap();
        assert_eq!(writes.len(), 1);
        match &writes[0] {
            PendingWrite::Update { key, body, .. } => {
                assert_eq!(key, "[1]");
                assert_eq!(body["name"], "Acme Corp");
            }
            other => panic!("unexpected write: {other:?}"),
        }

        tracker.accept(&writes);
        assert!(!tracker.has_changes());
    }

    #[test]
    fn test_identity_resolution_returns_same_handle() {
        let mut tracker = ChangeTracker::new();
        let first = tracker.track_existing(key(1), owner(1, "Acme", None)).unwrap();
        first.write().name = "edited".to_string();

        let second = tracker.track_existing(key(1), owner(1, "Acme", None)).unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(second.read().name, "edited");
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_deleting_added_entry_forgets_it() {
        let mut tracker = ChangeTracker::new();
        tracker
            .attach(key(1), owner(1, "Acme", None), EntryState::Added)
            .unwrap();

        assert!(tracker.mark_deleted(Owner::NAME, "[1]"));
        assert!(tracker.is_empty());
        assert!(!tracker.mark_deleted(Owner::NAME, "[1]"));
    }

    #[test]
    fn test_accepted_delete_is_forgotten() {
        let mut tracker = ChangeTracker::new();
        tracker.track_existing(key(1), owner(1, "Acme", None)).unwrap();
        tracker.mark_deleted(Owner::NAME, "[1]");

        let writes = tracker.pending().unwrap();
        assert!(matches!(writes[0], PendingWrite::Delete { .. }));

        tracker.accept(&writes);
        assert!(tracker.find::<Owner>("[1]").is_none());
    }

    #[test]
    fn test_key_edit_is_rejected() {
        let mut tracker = ChangeTracker::new();
        let handle = tracker.track_existing(key(1), owner(1, "Acme", None)).unwrap();
        handle.write().id = 2;

        let err = tracker.pending().unwrap_err();
        assert!(matches!(err, CoreError::KeyChanged { .. }));
        assert!(tracker.has_changes());
    }

    #[test]
    fn test_rewind_restores_staged_state() {
        let mut tracker = ChangeTracker::new();
        tracker
            .attach(key(1), owner(1, "Acme", None), EntryState::Added)
            .unwrap();
        tracker.track_existing(key(2), owner(2, "acorn", None)).unwrap();
        tracker.mark_deleted(Owner::NAME, "[2]");

        tracker.open_journal();
        let writes = tracker.pending().unwrap();
        tracker.accept(&writes);
        assert!(!tracker.has_changes());
        assert!(tracker.find::<Owner>("[2]").is_none());

        assert_eq!(tracker.rewind(), 2);
        assert_eq!(tracker.state_of(Owner::NAME, "[1]"), Some(EntryState::Added));
        assert_eq!(tracker.state_of(Owner::NAME, "[2]"), Some(EntryState::Deleted));
        assert_eq!(tracker.pending().unwrap().len(), 2);

        // Nothing left to rewind.
        assert_eq!(tracker.rewind(), 0);
    }

    #[test]
    fn test_closed_journal_keeps_accepted_writes() {
        let mut tracker = ChangeTracker::new();
        tracker
            .attach(key(1), owner(1, "Acme", None), EntryState::Added)
            .unwrap();

        tracker.open_journal();
        let writes = tracker.pending().unwrap();
        tracker.accept(&writes);
        tracker.close_journal();

        assert_eq!(tracker.rewind(), 0);
        assert_eq!(tracker.state_of(Owner::NAME, "[1]"), Some(EntryState::Unchanged));
    }

    #[test]
    fn test_replace_keeps_added_state() {
        let mut tracker = ChangeTracker::new();
        tracker
            .attach(key(1), owner(1, "Acme", None), EntryState::Added)
            .unwrap();
        tracker.replace(key(1), owner(1, "Acme 2", None)).unwrap();

        assert_eq!(tracker.state_of(Owner::NAME, "[1]"), Some(EntryState::Added));
        assert!(matches!(
            tracker.pending().unwrap()[0],
            PendingWrite::Insert { .. }
        ));
    }
}
