//! # Metadata Inspector
//!
//! Per-type entity descriptors derived from the declared [`Schema`].
//!
//! ## Descriptor Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    describe::<Artist>()                                 │
//! │                                                                         │
//! │  First call                          Later calls                        │
//! │  ──────────                          ───────────                        │
//! │  REGISTRY miss                       REGISTRY hit (read lock)          │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  Artist::schema()                    same Arc<EntityDescriptor>        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  EntityDescriptor                                                       │
//! │    fields      [id, name, tag, ...]                                    │
//! │    key         [0]            (declaration order)                      │
//! │    searchable  name{contains}, tag{contains}                           │
//! │    sortable    name, plays                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  REGISTRY insert (write lock)                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A descriptor without key fields is still valid; only key-based operations
//! report [`CoreError::MissingPrimaryKey`].

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::filter::FilterOp;
use crate::model::{Field, Model, Schema};
use crate::value::{Value, ValueType};

static REGISTRY: Lazy<RwLock<HashMap<TypeId, Arc<EntityDescriptor>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

// =============================================================================
// Field Descriptor
// =============================================================================

/// Metadata of one declared property.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub ty: ValueType,
    /// Operators the property may be filtered with by clients.
    pub searchable_ops: Vec<FilterOp>,
    pub sortable: bool,
    pub required: bool,
    /// Position within the primary key, if the property is a key part.
    pub key_position: Option<usize>,
}

impl FieldDescriptor {
    pub fn is_searchable(&self) -> bool {
        !self.searchable_ops.is_empty()
    }

    /// Returns true if clients may filter this property with `op`.
    pub fn supports(&self, op: FilterOp) -> bool {
        self.searchable_ops.contains(&op)
    }

    pub fn is_key(&self) -> bool {
        self.key_position.is_some()
    }
}

// =============================================================================
// Entity Descriptor
// =============================================================================

/// Immutable metadata of an entity type.
#[derive(Debug)]
pub struct EntityDescriptor {
    name: &'static str,
    fields: Vec<FieldDescriptor>,
    /// Indexes into `fields`, in key declaration order.
    key: Vec<usize>,
}

impl EntityDescriptor {
    /// Builds a descriptor from a schema.
    pub fn from_schema(schema: Schema) -> Self {
        let name = schema.name();
        let mut key = Vec::new();
        let fields = schema
            .into_fields()
            .into_iter()
            .enumerate()
            .map(|(index, field): (usize, Field)| {
                let key_position = if field.key {
                    key.push(index);
                    Some(key.len() - 1)
                } else {
                    None
                };
                FieldDescriptor {
                    name: field.name,
                    ty: field.ty,
                    searchable_ops: field.searchable,
                    sortable: field.sortable,
                    required: field.required,
                    key_position,
                }
            })
            .collect();

        EntityDescriptor { name, fields, key }
    }

    /// Entity name (also the store collection).
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Looks up a property by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Like [`field`](Self::field) but fails with `UnknownProperty`.
    pub fn require_field(&self, name: &str) -> CoreResult<&FieldDescriptor> {
        self.field(name).ok_or_else(|| CoreError::UnknownProperty {
            entity: self.name.to_string(),
            path: name.to_string(),
            segment: name.to_string(),
        })
    }

    /// Primary key properties in declaration order.
    ///
    /// ## Errors
    /// `MissingPrimaryKey` when the entity declares no key fields.
    pub fn primary_key(&self) -> CoreResult<Vec<&FieldDescriptor>> {
        if self.key.is_empty() {
            return Err(CoreError::MissingPrimaryKey {
                entity: self.name.to_string(),
            });
        }
        Ok(self.key.iter().map(|&i| &self.fields[i]).collect())
    }

    pub fn has_primary_key(&self) -> bool {
        !self.key.is_empty()
    }

    /// Properties that take part in search or declared filters.
    pub fn searchable_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_searchable())
    }

    /// Properties that may root an order path.
    pub fn sortable_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.sortable)
    }

    /// Reads the key values of an entity, in key order.
    pub fn key_values<T: Model>(&self, entity: &T) -> CoreResult<Vec<Value>> {
        Ok(self
            .primary_key()?
            .into_iter()
            .map(|f| entity.read(f.name).unwrap_or_default())
            .collect())
    }

    /// Canonical key string for a list of key values.
    ///
    /// Values are coerced to the declared key types first, so `Int(1)` and a
    /// `Float` key declared as such encode the same way regardless of how
    /// the caller spelled them.
    ///
    /// ## Errors
    /// - `MissingPrimaryKey` if no key is declared
    /// - `KeyArity` if `values.len()` differs from the key length
    /// - `TypeMismatch` if a value is null or not of the key part's type
    pub fn encode_key(&self, values: &[Value]) -> CoreResult<String> {
        let key = self.primary_key()?;
        if key.len() != values.len() {
            return Err(CoreError::KeyArity {
                entity: self.name.to_string(),
                expected: key.len(),
                actual: values.len(),
            });
        }

        let mut parts = Vec::with_capacity(values.len());
        for (field, value) in key.iter().zip(values) {
            let coerced = match field.ty.coerce(value.clone()) {
                Some(v) if !v.is_null() => v,
                _ => return Err(CoreError::type_mismatch(field.name, field.ty, value.type_name())),
            };
            parts.push(serde_json::Value::from(coerced));
        }
        Ok(serde_json::Value::Array(parts).to_string())
    }

    /// Canonical key string of an entity.
    pub fn key_of<T: Model>(&self, entity: &T) -> CoreResult<String> {
        self.encode_key(&self.key_values(entity)?)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Returns the cached descriptor of `T`, building it on first use.
pub fn describe<T: Model>() -> Arc<EntityDescriptor> {
    let type_id = TypeId::of::<T>();
    if let Some(descriptor) = REGISTRY.read().get(&type_id) {
        return Arc::clone(descriptor);
    }

    let built = Arc::new(EntityDescriptor::from_schema(T::schema()));
    let mut registry = REGISTRY.write();
    let descriptor = registry.entry(type_id).or_insert_with(|| {
        debug!(
            entity = T::NAME,
            fields = built.fields.len(),
            key_parts = built.key.len(),
            "Built entity descriptor"
        );
        Arc::clone(&built)
    });
    Arc::clone(descriptor)
}

// =============================================================================
// Unit Tests
// =============================================================================
