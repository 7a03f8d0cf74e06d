//! # Validation Module
//!
//! Field-level validation of entities against their declared schema.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Rust types (deserialization)                                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE, declared field constraints                      │
//! │  ├── required      → not null, not empty text                          │
//! │  ├── enum          → value is one of the declared variants             │
//! │  └── type          → read value fits the declared type                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  └── UNIQUE (collection, entity_key)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Validation never short-circuits: the report lists every failing field so
//! a caller can show them all at once.

use std::fmt;

use serde::Serialize;

use crate::descriptor::describe;
use crate::error::{CoreError, CoreResult};
use crate::model::Model;
use crate::value::{Value, ValueType};

// =============================================================================
// Report
// =============================================================================

/// One failed constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// All failed constraints of an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<FieldError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Errors reported for one field.
    pub fn errors_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FieldError> {
        self.errors.iter().filter(move |e| e.field == field)
    }

    /// `Ok` when valid, otherwise [`CoreError::Validation`].
    pub fn into_result(self) -> CoreResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(CoreError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return f.write_str("no errors");
        }
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", error.field, error.message)?;
        }
        Ok(())
    }
}

// =============================================================================
// Validators
// =============================================================================

/// Validates every declared field of `entity`.
///
/// ## Rules
/// - `required` fields must not be null or empty text
/// - enum fields must hold one of their variants
/// - any other non-null value must fit the declared type
pub fn validate<T: Model>(entity: &T) -> ValidationReport {
    let descriptor = describe::<T>();
    let mut report = ValidationReport::default();

    for field in descriptor.fields() {
        let value = entity.read(field.name).unwrap_or_default();

        if value.is_null_or_empty() {
            if field.required {
                report.push(field.name, "is required");
            }
            continue;
        }

        match (field.ty, &value) {
            (ValueType::Enum(allowed), Value::Text(text)) => {
                if let Err(error) = validate_enum(field.name, text, allowed) {
                    report.errors.push(error);
                }
            }
            (ty, _) => {
                if ty.coerce(value.clone()).is_none() {
                    report.push(
                        field.name,
                        format!("expected {ty}, found {}", value.type_name()),
                    );
                }
            }
        }
    }

    report
}

/// Checks that `value` is one of `allowed`.
///
/// ## Example
/// ```rust
/// use quarry_core::validation::validate_enum;
///
/// assert!(validate_enum("genre", "rock", &["rock", "jazz"]).is_ok());
/// assert!(validate_enum("genre", "polka", &["rock", "jazz"]).is_err());
/// ```
pub fn validate_enum(field: &str, value: &str, allowed: &[&str]) -> Result<(), FieldError> {
    if allowed.contains(&value) {
        return Ok(());
    }
    Err(FieldError {
        field: field.to_string(),
        message: format!("'{value}' is not a valid value for {field}"),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::artist;

    #[test]
    fn test_valid_entity() {
        let report = validate(&artist(1, "Acme", Some("indie")));
        assert!(report.is_valid(), "{report}");
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut invalid = artist(1, "", None);
        invalid.genre = "polka".to_string();

        let report = validate(&invalid);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.errors_for("name").count(), 1);
        assert_eq!(
            report.errors_for("genre").next().map(|e| e.message.as_str()),
            Some("'polka' is not a valid value for genre")
        );

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(err.to_string().contains("name: is required"));
    }

    #[test]
    fn test_empty_report_display() {
        assert_eq!(ValidationReport::default().to_string(), "no errors");
    }
}
