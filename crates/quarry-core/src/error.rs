//! # Error Types
//!
//! Error types for quarry-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  quarry-core errors (this file)                                        │
//! │  ├── CoreError        - Configuration / type errors, raised before     │
//! │  │                      any store round-trip                           │
//! │  └── ValidationReport - Structured field errors (not control flow)     │
//! │                                                                         │
//! │  quarry-db errors (separate crate)                                     │
//! │  └── DbError          - Store failures, wraps CoreError                │
//! │                                                                         │
//! │  Flow: CoreError → DbError → caller                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::filter::FilterOp;
use crate::validation::ValidationReport;

// =============================================================================
// Error Kind
// =============================================================================

/// Coarse classification shared by [`CoreError`] and the db crate's errors.
///
/// Callers map these to their own surface (HTTP status, exit code, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unresolvable path, missing key, operator/type mismatch.
    Configuration,
    /// Key lookup yielded nothing.
    NotFound,
    /// Store rejected a read or write.
    Persistence,
    /// Entity failed a declared field constraint.
    Validation,
    /// Caller cancelled the operation.
    Cancelled,
    /// Store or session no longer usable.
    Unavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Validation => "validation",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Core Error
// =============================================================================

/// Query model errors.
///
/// Every variant except `Validation` and `Serialization` is a configuration
/// error: it is detected while building a predicate, ordering or key, never
/// while talking to the store.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A path segment does not name a property on the type reached so far.
    ///
    /// ## When This Occurs
    /// - Filtering on a property the entity does not declare
    /// - Ordering by `owner.nmae` (typo in a nested segment)
    /// - Descending into a property that is not a nested model
    #[error("{entity} has no property '{segment}' (path '{path}')")]
    UnknownProperty {
        entity: String,
        path: String,
        segment: String,
    },

    /// Path is empty or contains an empty segment (`a..b`).
    #[error("Invalid property path: '{0}'")]
    InvalidPath(String),

    /// Entity declares no key fields but a key-based operation was requested.
    #[error("{entity} does not declare a primary key")]
    MissingPrimaryKey { entity: String },

    /// Number of supplied key values differs from the declared key.
    #[error("{entity} key has {expected} part(s), got {actual}")]
    KeyArity {
        entity: String,
        expected: usize,
        actual: usize,
    },

    /// Supplied value cannot be compared with the property's declared type.
    #[error("Type mismatch on '{property}': expected {expected}, found {found}")]
    TypeMismatch {
        property: String,
        expected: String,
        found: String,
    },

    /// Operator is not defined for the property's type.
    ///
    /// ## When This Occurs
    /// - `contains` on a numeric property
    /// - `lessThan` on a boolean or text property
    #[error("Operator {op} is not supported on '{property}' ({ty})")]
    UnsupportedOperator {
        property: String,
        op: FilterOp,
        ty: String,
    },

    /// Path root is not declared sortable.
    #[error("{entity} cannot be ordered by '{path}'")]
    NotSortable { entity: String, path: String },

    /// Property/operator pair is not declared filterable.
    #[error("{entity} cannot be filtered by '{property}' with {op}")]
    NotFilterable {
        entity: String,
        property: String,
        op: FilterOp,
    },

    /// Free-text search requested on a type with nothing searchable.
    #[error("{entity} has no searchable properties")]
    NoSearchableFields { entity: String },

    /// Include names a relation the entity does not declare.
    #[error("{entity} has no relation '{relation}'")]
    UnknownRelation { entity: String, relation: String },

    /// Order specification could not be parsed.
    #[error("Invalid order specification: '{0}'")]
    InvalidOrder(String),

    /// Page bounds are out of range.
    #[error("Invalid page request: {0}")]
    InvalidPage(String),

    /// A tracked entity's key was mutated after it was attached.
    #[error("Key of tracked {entity} changed from {from} to {to}")]
    KeyChanged {
        entity: String,
        from: String,
        to: String,
    },

    /// Entity failed field validation.
    #[error("Validation failed: {0}")]
    Validation(ValidationReport),

    /// Entity could not be converted to or from its stored document.
    #[error("Serialization failed for {entity}: {message}")]
    Serialization { entity: String, message: String },
}

impl CoreError {
    /// Returns the coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::Serialization { .. } => ErrorKind::Persistence,
            _ => ErrorKind::Configuration,
        }
    }

    /// Creates a TypeMismatch error.
    pub fn type_mismatch(
        property: impl Into<String>,
        expected: impl fmt::Display,
        found: impl fmt::Display,
    ) -> Self {
        CoreError::TypeMismatch {
            property: property.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Creates a Serialization error from any displayable cause.
    pub fn serialization(entity: impl Into<String>, cause: impl fmt::Display) -> Self {
        CoreError::Serialization {
            entity: entity.into(),
            message: cause.to_string(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::KeyArity {
            entity: "track".to_string(),
            expected: 2,
            actual: 1,
        };
        assert_eq!(err.to_string(), "track key has 2 part(s), got 1");

        let err = CoreError::UnsupportedOperator {
            property: "plays".to_string(),
            op: FilterOp::Contains,
            ty: "int".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Operator contains is not supported on 'plays' (int)"
        );
    }

    #[test]
    fn test_error_kinds() {
        let err = CoreError::MissingPrimaryKey {
            entity: "log".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = CoreError::Validation(ValidationReport::default());
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = CoreError::serialization("artist", "eof");
        assert_eq!(err.kind(), ErrorKind::Persistence);
    }
}
