//! # Order Builder
//!
//! Key extractors for dotted property paths and stable multi-key sorting.
//!
//! ## Sorting
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  OrderBy::new("label.name:desc").then("name")                          │
//! │                                                                         │
//! │  1. Decorate   each entity with [label.name, name] key values          │
//! │  2. Sort       stable sort on the key tuple                            │
//! │                  Null < every other value (ascending)                  │
//! │                  desc reverses one key, never the tie order            │
//! │  3. Undecorate                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::descriptor::describe;
use crate::error::{CoreError, CoreResult};
use crate::model::Model;
use crate::path::PropertyPath;
use crate::value::Value;

// =============================================================================
// Direction / Order Specification
// =============================================================================

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl FromStr for Direction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Direction::Asc),
            "desc" | "descending" => Ok(Direction::Desc),
            other => Err(CoreError::InvalidOrder(other.to_string())),
        }
    }
}

/// `{ path, direction }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub path: String,
    #[serde(default)]
    pub direction: Direction,
}

impl OrderSpec {
    pub fn asc(path: impl Into<String>) -> Self {
        OrderSpec {
            path: path.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(path: impl Into<String>) -> Self {
        OrderSpec {
            path: path.into(),
            direction: Direction::Desc,
        }
    }

    /// Parses `"path"`, `"path:asc"` or `"path:desc"`.
    pub fn parse(spec: &str) -> CoreResult<Self> {
        let (path, direction) = match spec.split_once(':') {
            Some((path, direction)) => (path.trim(), direction.parse()?),
            None => (spec.trim(), Direction::Asc),
        };
        if path.is_empty() {
            return Err(CoreError::InvalidOrder(spec.to_string()));
        }
        Ok(OrderSpec {
            path: path.to_string(),
            direction,
        })
    }
}

impl FromStr for OrderSpec {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderSpec::parse(s)
    }
}

impl fmt::Display for OrderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Asc => write!(f, "{}:asc", self.path),
            Direction::Desc => write!(f, "{}:desc", self.path),
        }
    }
}

// =============================================================================
// Key Extractor
// =============================================================================

/// Reads the sort key of an entity.
pub struct KeyExtractor<T> {
    path: Arc<PropertyPath>,
    _entity: std::marker::PhantomData<fn(&T)>,
}

impl<T> Clone for KeyExtractor<T> {
    fn clone(&self) -> Self {
        KeyExtractor {
            path: Arc::clone(&self.path),
            _entity: std::marker::PhantomData,
        }
    }
}

impl<T> fmt::Debug for KeyExtractor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyExtractor").field(&self.path.as_str()).finish()
    }
}

impl<T: Model> KeyExtractor<T> {
    pub fn extract(&self, entity: &T) -> Value {
        self.path.read(entity)
    }

    pub fn path(&self) -> &PropertyPath {
        &self.path
    }
}

/// Builds a key extractor for a dotted path.
///
/// ## Errors
/// - `UnknownProperty` / `InvalidPath` if the path does not resolve
/// - `InvalidOrder` if the path ends on a nested model
pub fn key_extractor<T: Model>(path: &str) -> CoreResult<KeyExtractor<T>> {
    let resolved = PropertyPath::resolve(&describe::<T>(), path)?;
    if !resolved.leaf_type().is_orderable() {
        return Err(CoreError::InvalidOrder(format!(
            "'{path}' is a nested model, order by one of its properties"
        )));
    }
    Ok(KeyExtractor {
        path: Arc::new(resolved),
        _entity: std::marker::PhantomData,
    })
}

// =============================================================================
// Order By
// =============================================================================

/// One or more sort keys applied in sequence.
pub struct OrderBy<T> {
    keys: Vec<(KeyExtractor<T>, Direction)>,
}

impl<T> Clone for OrderBy<T> {
    fn clone(&self) -> Self {
        OrderBy {
            keys: self.keys.clone(),
        }
    }
}

impl<T> fmt::Debug for OrderBy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.keys.iter().map(|(k, d)| (k.path.as_str(), *d)))
            .finish()
    }
}

impl<T> Default for OrderBy<T> {
    fn default() -> Self {
        OrderBy { keys: Vec::new() }
    }
}

impl<T: Model> OrderBy<T> {
    /// Starts an ordering from a single key.
    pub fn new(spec: impl Into<OrderSpec>) -> CoreResult<Self> {
        OrderBy::default().then(spec)
    }

    /// Adds a tie-breaking key.
    pub fn then(mut self, spec: impl Into<OrderSpec>) -> CoreResult<Self> {
        let spec = spec.into();
        self.keys.push((key_extractor(&spec.path)?, spec.direction));
        Ok(self)
    }

    /// Like [`then`](Self::then) but the path root must be declared sortable.
    pub fn then_sortable(self, spec: impl Into<OrderSpec>) -> CoreResult<Self> {
        let spec = spec.into();
        let descriptor = describe::<T>();
        let root = spec.path.split('.').next().unwrap_or_default();
        if let Some(field) = descriptor.field(root) {
            if !field.sortable {
                return Err(CoreError::NotSortable {
                    entity: descriptor.name().to_string(),
                    path: spec.path,
                });
            }
        }
        self.then(spec)
    }

    /// Root properties of all key paths.
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|(k, _)| k.path.root())
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Compares two entities on every key in turn.
    pub fn compare(&self, a: &T, b: &T) -> Ordering {
        for (key, direction) in &self.keys {
            let ordering = apply(key.extract(a).sort_cmp(&key.extract(b)), *direction);
            if ordering.is_ne() {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Stable sort: ties keep their original relative order in both
    /// directions.
    pub fn sort(&self, items: &mut Vec<T>) {
        if self.keys.is_empty() || items.len() < 2 {
            return;
        }

        let mut decorated: Vec<(Vec<Value>, T)> = items
            .drain(..)
            .map(|item| {
                let keys = self.keys.iter().map(|(k, _)| k.extract(&item)).collect();
                (keys, item)
            })
            .collect();

        decorated.sort_by(|(a, _), (b, _)| {
            a.iter()
                .zip(b)
                .zip(&self.keys)
                .map(|((x, y), (_, direction))| apply(x.sort_cmp(y), *direction))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        items.extend(decorated.into_iter().map(|(_, item)| item));
    }
}

fn apply(ordering: Ordering, direction: Direction) -> Ordering {
    match direction {
        Direction::Asc => ordering,
        Direction::Desc => ordering.reverse(),
    }
}

impl From<&str> for OrderSpec {
    fn from(path: &str) -> Self {
        OrderSpec::asc(path)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{album, artist, Album, Artist, Label};

    fn names(artists: &[Artist]) -> Vec<&str> {
        artists.iter().map(|a| a.name.as_str()).collect()
    }

    #[test]
    fn test_parse_order_spec() {
        assert_eq!(OrderSpec::parse("name").unwrap(), OrderSpec::asc("name"));
        assert_eq!(OrderSpec::parse("name:DESC").unwrap(), OrderSpec::desc("name"));
        assert_eq!(
            "label.name : asc".parse::<OrderSpec>().unwrap(),
            OrderSpec::asc("label.name")
        );
        assert!(OrderSpec::parse("name:sideways").is_err());
        assert!(OrderSpec::parse(":desc").is_err());
    }

    #[test]
    fn test_stable_sort_on_ties() {
        let mut artists = vec![
            artist(1, "b", Some("x")),
            artist(2, "a", Some("y")),
            artist(3, "b", Some("z")),
            artist(4, "a", Some("w")),
        ];

        OrderBy::new("name").unwrap().sort(&mut artists);
        let ids: Vec<_> = artists.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![2, 4, 1, 3]);

        OrderBy::new(OrderSpec::desc("name")).unwrap().sort(&mut artists);
        let ids: Vec<_> = artists.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 3, 2, 4]);
    }

    #[test]
    fn test_nulls_first_and_then_by() {
        let mut artists = vec![
            artist(1, "Zed", Some("b")),
            artist(2, "Acme", None),
            artist(3, "Moe", Some("a")),
            artist(4, "Bee", Some("a")),
        ];

        OrderBy::new("tag")
            .and_then(|o| o.then(OrderSpec::desc("name")))
            .unwrap()
            .sort(&mut artists);
        assert_eq!(names(&artists), vec!["Acme", "Moe", "Bee", "Zed"]);
    }

    #[test]
    fn test_nested_path_ordering() {
        let label = |name: &str| {
            Some(Label {
                name: name.to_string(),
                country: "US".to_string(),
            })
        };
        let mut artists = vec![
            artist(1, "One", None),
            artist(2, "Two", None),
            artist(3, "Three", None),
        ];
        artists[0].label = label("Warp");
        artists[2].label = label("Domino");

        OrderBy::new("label.name").unwrap().sort(&mut artists);
        assert_eq!(names(&artists), vec!["Two", "Three", "One"]);
    }

    #[test]
    fn test_invalid_order_paths() {
        let err = key_extractor::<Album>("artist.nmae").unwrap_err();
        assert!(matches!(err, CoreError::UnknownProperty { .. }));

        let err = key_extractor::<Album>("artist").unwrap_err();
        assert!(matches!(err, CoreError::InvalidOrder(_)));
    }

    #[test]
    fn test_then_sortable_checks_root() {
        let order = OrderBy::<Album>::default()
            .then_sortable("artist.name")
            .unwrap();
        assert_eq!(order.roots().collect::<Vec<_>>(), vec!["artist"]);

        let err = OrderBy::<Artist>::default().then_sortable("tag").unwrap_err();
        assert!(matches!(err, CoreError::NotSortable { .. }));

        let mut albums = vec![album(2, "b", None), album(1, "a", None)];
        OrderBy::new("title").unwrap().sort(&mut albums);
        assert_eq!(albums[0].id, 1);
    }
}
