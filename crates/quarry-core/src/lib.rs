//! # quarry-core: Pure Query Model for Quarry
//!
//! This crate contains everything about *what* a query means, with zero I/O
//! dependencies: entity metadata, predicates, orderings, paging and
//! validation. The `quarry-db` crate decides *where* the entities come from.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Quarry Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Application code                             │   │
//! │  │    QueryRequest ──► repository.query() ──► QueryPage            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               quarry-db (Database Layer)                        │   │
//! │  │     UnitOfWork, QueryRepository<T>, Query<T>, SQLite store      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ quarry-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │ descriptor│  │ predicate │  │   order   │  │ validation│  │   │
//! │  │   │  Entity   │  │ Predicate │  │  OrderBy  │  │  Report   │  │   │
//! │  │   │ metadata  │  │  search   │  │ KeyExtr.  │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO ASYNC                               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`value`] - Dynamically typed property values and declared types
//! - [`model`] - `Model` / `Entity` traits and schema declarations
//! - [`descriptor`] - Metadata Inspector (cached per entity type)
//! - [`path`] - Dotted property paths
//! - [`predicate`] - Predicate Builder
//! - [`order`] - Order Builder
//! - [`filter`] - Declarative filter specifications
//! - [`request`] - Paging, result pages, query requests
//! - [`relation`] - Includable relations
//! - [`validation`] - Field validation
//! - [`error`] - Core error types
//!
//! ## Example Usage
//!
//! ```rust
//! use quarry_core::{predicate, Entity, Field, Model, OrderBy, Schema, Value, ValueType};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Track {
//!     id: i64,
//!     title: String,
//! }
//!
//! impl Model for Track {
//!     const NAME: &'static str = "track";
//!
//!     fn schema() -> Schema {
//!         Schema::new(Self::NAME)
//!             .field(Field::new("id", ValueType::Int).key())
//!             .field(Field::new("title", ValueType::Text).searchable().sortable())
//!     }
//!
//!     fn read(&self, property: &str) -> Option<Value> {
//!         match property {
//!             "id" => Some(self.id.into()),
//!             "title" => Some(self.title.as_str().into()),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! impl Entity for Track {}
//!
//! let mut tracks = vec![
//!     Track { id: 1, title: "Zebra".into() },
//!     Track { id: 2, title: "alpha".into() },
//! ];
//!
//! let search = predicate::search::<Track>("ZEB").unwrap();
//! assert!(search.matches(&tracks[0]));
//!
//! OrderBy::new("title").unwrap().sort(&mut tracks);
//! assert_eq!(tracks[0].id, 1); // "Zebra" < "alpha" (ordinal)
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod descriptor;
pub mod error;
pub mod filter;
pub mod model;
pub mod order;
pub mod path;
pub mod predicate;
pub mod relation;
pub mod request;
pub mod validation;
pub mod value;

#[cfg(test)]
mod test_fixtures;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use quarry_core::Predicate` instead of
// `use quarry_core::predicate::Predicate`

pub use descriptor::{describe, EntityDescriptor, FieldDescriptor};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use filter::{FilterOp, FilterSpec};
pub use model::{record_of, Entity, Field, Model, Schema};
pub use order::{key_extractor, Direction, KeyExtractor, OrderBy, OrderSpec};
pub use path::PropertyPath;
pub use predicate::Predicate;
pub use relation::{find_relation, Relation, RelationKind};
pub use request::{PageRequest, QueryPage, QueryRequest, RequestPlan, DEFAULT_PAGE_SIZE};
pub use validation::{validate, FieldError, ValidationReport};
pub use value::{Value, ValueType};
