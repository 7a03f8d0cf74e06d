//! # Filter Specifications
//!
//! Declarative `{ property, operator, value }` filters as they arrive from a
//! caller, and their conversion into [`Predicate`]s.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::descriptor::describe;
use crate::error::{CoreError, CoreResult};
use crate::model::Model;
use crate::predicate::{compare, Predicate};
use crate::value::Value;

// =============================================================================
// Filter Operator
// =============================================================================

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOp {
    Equals,
    NotEquals,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    IsNullOrEmpty,
    Contains,
}

impl FilterOp {
    pub const ALL: [FilterOp; 8] = [
        FilterOp::Equals,
        FilterOp::NotEquals,
        FilterOp::LessThan,
        FilterOp::LessOrEqual,
        FilterOp::GreaterThan,
        FilterOp::GreaterOrEqual,
        FilterOp::IsNullOrEmpty,
        FilterOp::Contains,
    ];

    /// Wire name, as accepted by [`FromStr`].
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Equals => "equals",
            FilterOp::NotEquals => "notEquals",
            FilterOp::LessThan => "lessThan",
            FilterOp::LessOrEqual => "lessOrEqual",
            FilterOp::GreaterThan => "greaterThan",
            FilterOp::GreaterOrEqual => "greaterOrEqual",
            FilterOp::IsNullOrEmpty => "isNullOrEmpty",
            FilterOp::Contains => "contains",
        }
    }

    /// `<`, `<=`, `>`, `>=`.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            FilterOp::LessThan
                | FilterOp::LessOrEqual
                | FilterOp::GreaterThan
                | FilterOp::GreaterOrEqual
        )
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterOp::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown filter operator: {s}"))
    }
}

// =============================================================================
// Filter Specification
// =============================================================================

/// A single declarative filter.
///
/// ```json
/// { "property": "plays", "op": "greaterThan", "value": 100 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    pub property: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: Value,
}

impl FilterSpec {
    pub fn new(property: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        FilterSpec {
            property: property.into(),
            op,
            value: value.into(),
        }
    }

    /// Builds the predicate with only type checks.
    pub fn to_predicate<T: Model>(&self) -> CoreResult<Predicate<T>> {
        compare(&self.property, self.op, self.value.clone())
    }

    /// Builds the predicate after checking that the root property is
    /// declared searchable with this operator.
    ///
    /// Used for filters supplied by untrusted callers.
    pub fn to_declared_predicate<T: Model>(&self) -> CoreResult<Predicate<T>> {
        let descriptor = describe::<T>();
        let root = self.property.split('.').next().unwrap_or_default();
        // Unknown roots fall through and surface as UnknownProperty.
        if let Some(field) = descriptor.field(root) {
            if !field.supports(self.op) {
                return Err(CoreError::NotFilterable {
                    entity: descriptor.name().to_string(),
                    property: self.property.clone(),
                    op: self.op,
                });
            }
        }
        self.to_predicate()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{artist, Artist};

    #[test]
    fn test_op_names_round_trip() {
        for op in FilterOp::ALL {
            assert_eq!(op.as_str().parse::<FilterOp>().unwrap(), op);
        }
        assert_eq!("CONTAINS".parse::<FilterOp>().unwrap(), FilterOp::Contains);
        assert!("like".parse::<FilterOp>().is_err());
    }

    #[test]
    fn test_deserialize_filter_spec() {
        let spec: FilterSpec = serde_json::from_str(
            r#"{ "property": "plays", "op": "greaterOrEqual", "value": 100 }"#,
        )
        .unwrap();
        assert_eq!(spec, FilterSpec::new("plays", FilterOp::GreaterOrEqual, 100));

        let spec: FilterSpec =
            serde_json::from_str(r#"{ "property": "tag", "op": "isNullOrEmpty" }"#).unwrap();
        assert_eq!(spec.value, Value::Null);
    }

    #[test]
    fn test_declared_filter_checks() {
        let spec = FilterSpec::new("plays", FilterOp::GreaterThan, 5);
        let predicate = spec.to_declared_predicate::<Artist>().unwrap();
        let mut loud = artist(1, "Acme", None);
        loud.plays = 9;
        assert!(predicate.matches(&loud));

        // Not declared for clients even though the type supports it.
        let spec = FilterSpec::new("plays", FilterOp::LessOrEqual, 5);
        let err = spec.to_declared_predicate::<Artist>().unwrap_err();
        assert!(matches!(err, CoreError::NotFilterable { .. }));

        let spec = FilterSpec::new("genre", FilterOp::Equals, "rock");
        assert!(spec.to_predicate::<Artist>().is_ok());
        assert!(matches!(
            spec.to_declared_predicate::<Artist>().unwrap_err(),
            CoreError::NotFilterable { .. }
        ));

        let spec = FilterSpec::new("missing", FilterOp::Equals, 1);
        assert!(matches!(
            spec.to_declared_predicate::<Artist>().unwrap_err(),
            CoreError::UnknownProperty { .. }
        ));
    }
}
