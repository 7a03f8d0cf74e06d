//! # Property Paths
//!
//! Dotted paths (`label.country`) resolved against an entity descriptor and
//! the schemas of its nested models. Predicates and orderings both start
//! from a resolved path, so an unknown segment is reported once, at
//! construction, before anything touches the store.

use crate::descriptor::EntityDescriptor;
use crate::error::{CoreError, CoreResult};
use crate::model::Model;
use crate::value::{Value, ValueType};

/// A validated property path.
#[derive(Debug, Clone)]
pub struct PropertyPath {
    path: String,
    segments: Vec<String>,
    leaf: ValueType,
}

impl PropertyPath {
    /// Resolves `path` segment by segment.
    ///
    /// ## Errors
    /// - `InvalidPath` for an empty path or an empty segment
    /// - `UnknownProperty` when a segment is not declared on the model
    ///   reached so far (including descending into a non-model property)
    pub fn resolve(descriptor: &EntityDescriptor, path: &str) -> CoreResult<Self> {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if path.trim().is_empty() || segments.iter().any(|s| s.trim().is_empty()) {
            return Err(CoreError::InvalidPath(path.to_string()));
        }

        let unknown = |entity: &str, segment: &str| CoreError::UnknownProperty {
            entity: entity.to_string(),
            path: path.to_string(),
            segment: segment.to_string(),
        };

        let root = descriptor
            .field(&segments[0])
            .ok_or_else(|| unknown(descriptor.name(), &segments[0]))?;

        let mut owner = descriptor.name();
        let mut leaf = root.ty;
        for segment in &segments[1..] {
            let schema = leaf.nested().ok_or_else(|| unknown(owner, segment))?;
            let field = schema.get(segment).ok_or_else(|| unknown(schema.name(), segment))?;
            owner = schema.name();
            leaf = field.ty;
        }

        Ok(PropertyPath {
            path: path.to_string(),
            segments,
            leaf,
        })
    }

    /// First segment; a property of the entity itself.
    pub fn root(&self) -> &str {
        &self.segments[0]
    }

    /// Declared type of the last segment.
    pub fn leaf_type(&self) -> ValueType {
        self.leaf
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
    }

    /// Reads the value at this path. A missing nested model yields `Null`.
    pub fn read<T: Model>(&self, entity: &T) -> Value {
        let mut current = entity.read(self.root()).unwrap_or_default();
        for segment in &self.segments[1..] {
            current = match current {
                Value::Record(mut fields) => fields.remove(segment).unwrap_or_default(),
                _ => return Value::Null,
            };
        }
        current
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
