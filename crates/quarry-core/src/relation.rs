//! # Relations
//!
//! Declarations of related entities that a query can load eagerly.
//!
//! ## How Includes Are Loaded
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  query.include("artist")                                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Album::relations() → Relation::reference::<Artist>("artist", ..)      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  quarry-db loads every document of the "artist" collection             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Relation::load(albums, documents)                                     │
//! │    decode → index by key → foreign_key(album) → attach(album, artist)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::descriptor::describe;
use crate::error::{CoreError, CoreResult};
use crate::model::{Entity, Model};
use crate::value::Value;

type Loader<T> = Arc<dyn Fn(&mut [T], Vec<serde_json::Value>) -> CoreResult<()> + Send + Sync>;

/// Cardinality of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Owner holds the related entity's key (many-to-one).
    Reference,
    /// Related entities point back at the owner (one-to-many).
    Collection,
}

/// A named relation from `T` to another entity type.
pub struct Relation<T> {
    name: &'static str,
    target: &'static str,
    kind: RelationKind,
    loader: Loader<T>,
}

impl<T> Clone for Relation<T> {
    fn clone(&self) -> Self {
        Relation {
            name: self.name,
            target: self.target,
            kind: self.kind,
            loader: Arc::clone(&self.loader),
        }
    }
}

impl<T> fmt::Debug for Relation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("kind", &self.kind)
            .finish()
    }
}

impl<T: Entity> Relation<T> {
    /// Many-to-one relation.
    ///
    /// `foreign_key` returns the related entity's key values as stored on the
    /// owner (all `Null` = no related entity). `attach` stores the result in
    /// the owner's navigation property.
    pub fn reference<R: Entity>(
        name: &'static str,
        foreign_key: fn(&T) -> Vec<Value>,
        attach: fn(&mut T, Option<R>),
    ) -> Self {
        let loader: Loader<T> = Arc::new(
            move |owners: &mut [T], documents: Vec<serde_json::Value>| -> CoreResult<()> {
                let descriptor = describe::<R>();
                let mut by_key = HashMap::with_capacity(documents.len());
                for related in decode_all::<R>(documents)? {
                    by_key.insert(descriptor.key_of(&related)?, related);
                }

                for owner in owners.iter_mut() {
                    let key = foreign_key(owner);
                    let found = if key.iter().all(Value::is_null) {
                        None
                    } else {
                        by_key.get(&descriptor.encode_key(&key)?).cloned()
                    };
                    attach(owner, found);
                }
                Ok(())
            },
        );

        Relation {
            name,
            target: R::NAME,
            kind: RelationKind::Reference,
            loader,
        }
    }

    /// One-to-many relation.
    ///
    /// Every related entity for which `belongs_to(related, owner)` holds is
    /// attached to the owner, in store order.
    pub fn collection<R: Entity>(
        name: &'static str,
        belongs_to: fn(&R, &T) -> bool,
        attach: fn(&mut T, Vec<R>),
    ) -> Self {
        let loader: Loader<T> = Arc::new(
            move |owners: &mut [T], documents: Vec<serde_json::Value>| -> CoreResult<()> {
                let related = decode_all::<R>(documents)?;
                for owner in owners.iter_mut() {
                    let children = related
                        .iter()
                        .filter(|r| belongs_to(r, owner))
                        .cloned()
                        .collect();
                    attach(owner, children);
                }
                Ok(())
            },
        );

        Relation {
            name,
            target: R::NAME,
            kind: RelationKind::Collection,
            loader,
        }
    }
}

impl<T> Relation<T> {
    /// Navigation property name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Collection of the related entity.
    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    /// Fills the navigation property of every owner from the target
    /// collection's documents.
    pub fn load(&self, owners: &mut [T], documents: Vec<serde_json::Value>) -> CoreResult<()> {
        (self.loader)(owners, documents)
    }
}

/// Looks up a declared relation of `T` by name.
pub fn find_relation<T: Entity>(name: &str) -> CoreResult<Relation<T>> {
    T::relations()
        .into_iter()
        .find(|r| r.name == name)
        .ok_or_else(|| CoreError::UnknownRelation {
            entity: T::NAME.to_string(),
            relation: name.to_string(),
        })
}

/// Decodes stored documents into entities.
pub fn decode_all<R: Entity>(documents: Vec<serde_json::Value>) -> CoreResult<Vec<R>> {
    documents
        .into_iter()
        .map(|doc| serde_json::from_value(doc).map_err(|e| CoreError::serialization(R::NAME, e)))
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{album, artist, Album, Artist};

    fn documents(artists: &[Artist]) -> Vec<serde_json::Value> {
        artists
            .iter()
            .map(|a| serde_json::to_value(a).unwrap())
            .collect()
    }

    #[test]
    fn test_reference_attaches_by_key() {
        let relation = find_relation::<Album>("artist").unwrap();
        assert_eq!(relation.target(), "artist");
        assert_eq!(relation.kind(), RelationKind::Reference);

        let mut albums = vec![album(10, "Debut", Some(2)), album(11, "Orphan", None)];
        let artists = vec![artist(1, "Acme", None), artist(2, "acorn", None)];
        relation.load(&mut albums, documents(&artists)).unwrap();

        assert_eq!(albums[0].artist.as_ref().map(|a| a.id), Some(2));
        assert!(albums[1].artist.is_none());
    }

    #[test]
    fn test_collection_attaches_children_in_order() {
        let relation = find_relation::<Artist>("albums").unwrap();
        let mut artists = vec![artist(1, "Acme", None), artist(2, "acorn", None)];
        let albums = vec![
            album(10, "First", Some(1)),
            album(11, "Other", Some(2)),
            album(12, "Second", Some(1)),
        ];
        let docs = albums
            .iter()
            .map(|a| serde_json::to_value(a).unwrap())
            .collect();

        relation.load(&mut artists, docs).unwrap();

        let titles: Vec<_> = artists[0].albums.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second"]);
        assert_eq!(artists[1].albums.len(), 1);
    }

    #[test]
    fn test_unknown_relation() {
        let err = find_relation::<Album>("label").unwrap_err();
        assert!(matches!(err, CoreError::UnknownRelation { .. }));
    }

    #[test]
    fn test_corrupt_document_is_serialization_error() {
        let relation = find_relation::<Album>("artist").unwrap();
        let mut albums = vec![album(10, "Debut", Some(1))];
        let err = relation
            .load(&mut albums, vec![serde_json::json!({ "id": "x" })])
            .unwrap_err();
        assert!(matches!(err, CoreError::Serialization { .. }));
    }
}
