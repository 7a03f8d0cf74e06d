//! # Entity Model
//!
//! Traits an entity type implements so the generic repository can query it,
//! and the schema declarations that replace per-property attributes.
//!
//! ## Declaring an Entity
//! ```rust
//! use quarry_core::{Entity, Field, Model, Schema, Value, ValueType};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Artist {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl Model for Artist {
//!     const NAME: &'static str = "artist";
//!
//!     fn schema() -> Schema {
//!         Schema::new(Self::NAME)
//!             .field(Field::new("id", ValueType::Int).key())
//!             .field(Field::new("name", ValueType::Text).searchable().sortable())
//!     }
//!
//!     fn read(&self, property: &str) -> Option<Value> {
//!         match property {
//!             "id" => Some(self.id.into()),
//!             "name" => Some(self.name.as_str().into()),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! impl Entity for Artist {}
//!
//! let descriptor = quarry_core::describe::<Artist>();
//! assert_eq!(descriptor.searchable_fields().count(), 1);
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::filter::FilterOp;
use crate::relation::Relation;
use crate::value::{Value, ValueType};

// =============================================================================
// Field
// =============================================================================

/// Declaration of one property.
///
/// Builder flags mirror the property-level annotations of the entity:
/// `key` (primary key part, in declaration order), `searchable` (takes part
/// in free-text search and declared filters), `sortable`, `required`.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub ty: ValueType,
    pub key: bool,
    /// Operators clients may filter this property with. Empty = not searchable.
    pub searchable: Vec<FilterOp>,
    pub sortable: bool,
    pub required: bool,
}

impl Field {
    /// Creates a plain field.
    pub fn new(name: &'static str, ty: ValueType) -> Self {
        Field {
            name,
            ty,
            key: false,
            searchable: Vec::new(),
            sortable: false,
            required: false,
        }
    }

    /// Marks the field as the next primary key part.
    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    /// Marks the field searchable with `contains`.
    pub fn searchable(self) -> Self {
        self.searchable_with(&[FilterOp::Contains])
    }

    /// Marks the field searchable with an explicit operator set.
    pub fn searchable_with(mut self, ops: &[FilterOp]) -> Self {
        for op in ops {
            if !self.searchable.contains(op) {
                self.searchable.push(*op);
            }
        }
        self
    }

    /// Marks the field sortable.
    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    /// Marks the field required (not null, not empty text).
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

// =============================================================================
// Schema
// =============================================================================

/// Ordered list of field declarations for a model.
#[derive(Debug, Clone)]
pub struct Schema {
    name: &'static str,
    fields: Vec<Field>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new(name: &'static str) -> Self {
        Schema {
            name,
            fields: Vec::new(),
        }
    }

    /// Appends a field.
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Looks up a field by name.
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub(crate) fn into_fields(self) -> Vec<Field> {
        self.fields
    }
}

// =============================================================================
// Model / Entity
// =============================================================================

/// A type with a declared schema and by-name property reads.
///
/// Implemented by entities and by nested models embedded in them.
pub trait Model: Sized + Send + Sync + 'static {
    /// Model name; for entities also the store collection name.
    const NAME: &'static str;

    /// Field declarations. Called once per type by [`crate::describe`].
    fn schema() -> Schema;

    /// Reads a property by name. `None` for undeclared names.
    ///
    /// Nested models return [`Value::Record`] (see [`record_of`]).
    fn read(&self, property: &str) -> Option<Value>;

    /// All declared properties as a record.
    fn to_record(&self) -> Value {
        let schema = Self::schema();
        Value::Record(
            schema
                .fields()
                .iter()
                .map(|f| (f.name.to_string(), self.read(f.name).unwrap_or_default()))
                .collect(),
        )
    }
}

/// A persisted model.
///
/// Navigation properties filled by relations should be `#[serde(skip)]` so
/// they are not written into the entity's own document.
pub trait Entity: Model + Clone + Serialize + DeserializeOwned {
    /// Relations that can be included when querying this entity.
    fn relations() -> Vec<Relation<Self>> {
        Vec::new()
    }
}

/// Record value of an optional nested model, `Null` when absent.
pub fn record_of<M: Model>(model: Option<&M>) -> Value {
    model.map(Model::to_record).unwrap_or(Value::Null)
}

// =============================================================================
// Unit Tests
// =============================================================================
