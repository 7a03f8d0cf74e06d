//! # Predicate Builder
//!
//! Reusable boolean predicates over entities, built from property paths,
//! operators and values.
//!
//! ## Construction vs Evaluation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  compare::<Artist>("plays", GreaterThan, 100)                          │
//! │       │                                                                 │
//! │       ▼  construction (fails fast, no store access)                    │
//! │  resolve path ──► check operator vs type ──► coerce value              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Predicate<Artist>  (Arc'd closure, cheap to clone and combine)        │
//! │       │                                                                 │
//! │       ▼  evaluation (never fails)                                      │
//! │  predicate.matches(&artist) → bool                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Operator Rules
//! | Operator                 | Property types           | Null stored value |
//! |--------------------------|--------------------------|-------------------|
//! | equals / notEquals       | all except nested models | equals only Null  |
//! | lessThan .. greaterOrEq  | int, float, timestamp    | never matches     |
//! | isNullOrEmpty            | all                      | matches           |
//! | contains                 | text, enum, uuid         | never matches     |
//!
//! `contains` with a null or blank term matches everything.

use std::fmt;
use std::sync::Arc;

use crate::descriptor::describe;
use crate::error::{CoreError, CoreResult};
use crate::filter::FilterOp;
use crate::model::Model;
use crate::path::PropertyPath;
use crate::value::{Value, ValueType};

type Test<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

// =============================================================================
// Predicate
// =============================================================================

/// A boolean test over `T`.
pub struct Predicate<T> {
    test: Test<T>,
    /// `Some(b)` when the predicate is known to always return `b`.
    constant: Option<bool>,
    /// First segments of the nested paths the test reads.
    roots: Vec<String>,
}

impl<T> Clone for Predicate<T> {
    fn clone(&self) -> Self {
        Predicate {
            test: Arc::clone(&self.test),
            constant: self.constant,
            roots: self.roots.clone(),
        }
    }
}

impl<T> fmt::Debug for Predicate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.constant {
            Some(true) => f.write_str("Predicate(always)"),
            Some(false) => f.write_str("Predicate(never)"),
            None => f.write_str("Predicate(..)"),
        }
    }
}

impl<T: 'static> Predicate<T> {
    /// Wraps an arbitrary test.
    pub fn new(test: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Predicate {
            test: Arc::new(test),
            constant: None,
            roots: Vec::new(),
        }
    }

    /// Matches every entity.
    pub fn always() -> Self {
        Predicate {
            test: Arc::new(|_| true),
            constant: Some(true),
            roots: Vec::new(),
        }
    }

    /// Matches no entity.
    pub fn never() -> Self {
        Predicate {
            test: Arc::new(|_| false),
            constant: Some(false),
            roots: Vec::new(),
        }
    }

    pub fn is_always(&self) -> bool {
        self.constant == Some(true)
    }

    pub fn matches(&self, entity: &T) -> bool {
        (self.test)(entity)
    }

    /// Roots of the nested property paths this predicate reads, e.g.
    /// `label` for `label.country`. A query loads the matching relations
    /// before filtering.
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.roots.iter().map(String::as_str)
    }

    fn reading(mut self, roots: Vec<String>) -> Self {
        for root in roots {
            if !self.roots.contains(&root) {
                self.roots.push(root);
            }
        }
        self
    }

    /// Both predicates must hold.
    pub fn and(self, other: Predicate<T>) -> Self {
        match (self.constant, other.constant) {
            (Some(true), _) | (_, Some(false)) => other,
            (_, Some(true)) | (Some(false), _) => self,
            _ => {
                let (a, b) = (self.test, other.test);
                Predicate::new(move |e| a(e) && b(e))
                    .reading(self.roots)
                    .reading(other.roots)
            }
        }
    }

    /// Either predicate must hold.
    pub fn or(self, other: Predicate<T>) -> Self {
        match (self.constant, other.constant) {
            (Some(false), _) | (_, Some(true)) => other,
            (_, Some(false)) | (Some(true), _) => self,
            _ => {
                let (a, b) = (self.test, other.test);
                Predicate::new(move |e| a(e) || b(e))
                    .reading(self.roots)
                    .reading(other.roots)
            }
        }
    }

    pub fn negate(self) -> Self {
        match self.constant {
            Some(true) => Predicate::never(),
            Some(false) => Predicate::always(),
            None => {
                let test = self.test;
                Predicate::new(move |e| !test(e)).reading(self.roots)
            }
        }
    }

    /// Conjunction; an empty list matches everything.
    pub fn all(predicates: impl IntoIterator<Item = Predicate<T>>) -> Self {
        predicates
            .into_iter()
            .fold(Predicate::always(), Predicate::and)
    }

    /// Disjunction; an empty list matches nothing.
    pub fn any(predicates: impl IntoIterator<Item = Predicate<T>>) -> Self {
        predicates
            .into_iter()
            .fold(Predicate::never(), Predicate::or)
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Builds a single-property predicate for any operator.
///
/// `property` may be a dotted path into nested models. For
/// [`FilterOp::IsNullOrEmpty`] the value is ignored.
///
/// ## Errors
/// - `UnknownProperty` / `InvalidPath` if the path does not resolve
/// - `UnsupportedOperator` if the operator is undefined for the property type
/// - `TypeMismatch` if the value cannot be coerced to the property type
pub fn compare<T: Model>(
    property: &str,
    op: FilterOp,
    value: impl Into<Value>,
) -> CoreResult<Predicate<T>> {
    let descriptor = describe::<T>();
    let path = PropertyPath::resolve(&descriptor, property)?;
    let roots = if path.is_nested() {
        vec![path.root().to_string()]
    } else {
        Vec::new()
    };
    build(property, path, op, value.into()).map(|predicate| predicate.reading(roots))
}

fn build<T: Model>(
    property: &str,
    path: PropertyPath,
    op: FilterOp,
    value: Value,
) -> CoreResult<Predicate<T>> {
    let ty = path.leaf_type();

    let unsupported = || CoreError::UnsupportedOperator {
        property: property.to_string(),
        op,
        ty: ty.to_string(),
    };

    match op {
        FilterOp::IsNullOrEmpty => {
            Ok(Predicate::new(move |e: &T| path.read(e).is_null_or_empty()))
        }

        FilterOp::Contains => {
            if !ty.is_textual() {
                return Err(unsupported());
            }
            if value.is_null() || value.as_text().is_some_and(|t| t.trim().is_empty()) {
                return Ok(Predicate::always());
            }
            let term = value
                .as_text()
                .map(|t| t.to_uppercase())
                .ok_or_else(|| CoreError::type_mismatch(property, "text", value.type_name()))?;

            Ok(Predicate::new(move |e: &T| {
                path.read(e)
                    .as_text()
                    .is_some_and(|stored| stored.to_uppercase().contains(&term))
            }))
        }

        FilterOp::Equals | FilterOp::NotEquals => {
            if matches!(ty, ValueType::Model(_)) {
                return Err(unsupported());
            }
            let expected = coerce(property, ty, value)?;
            let negated = op == FilterOp::NotEquals;

            Ok(Predicate::new(move |e: &T| {
                let stored = normalize(ty, path.read(e));
                stored.matches(&expected) != negated
            }))
        }

        FilterOp::LessThan
        | FilterOp::LessOrEqual
        | FilterOp::GreaterThan
        | FilterOp::GreaterOrEqual => {
            if !ty.is_comparable() {
                return Err(unsupported());
            }
            if value.is_null() {
                return Err(CoreError::type_mismatch(property, ty, "null"));
            }
            let bound = coerce(property, ty, value)?;

            Ok(Predicate::new(move |e: &T| {
                let stored = normalize(ty, path.read(e));
                match stored.compare(&bound) {
                    Some(ordering) => match op {
                        FilterOp::LessThan => ordering.is_lt(),
                        FilterOp::LessOrEqual => ordering.is_le(),
                        FilterOp::GreaterThan => ordering.is_gt(),
                        _ => ordering.is_ge(),
                    },
                    None => false,
                }
            }))
        }
    }
}

fn coerce(property: &str, ty: ValueType, value: Value) -> CoreResult<Value> {
    let found = value.type_name();
    ty.coerce(value)
        .ok_or_else(|| CoreError::type_mismatch(property, ty, found))
}

/// Stored values may be spelled loosely (a uuid held as text); bring them
/// to the declared representation before comparing.
fn normalize(ty: ValueType, stored: Value) -> Value {
    if matches!(stored, Value::Text(_) | Value::Int(_)) {
        ty.coerce(stored.clone()).unwrap_or(stored)
    } else {
        stored
    }
}

pub fn equals<T: Model>(property: &str, value: impl Into<Value>) -> CoreResult<Predicate<T>> {
    compare(property, FilterOp::Equals, value)
}

pub fn not_equals<T: Model>(property: &str, value: impl Into<Value>) -> CoreResult<Predicate<T>> {
    compare(property, FilterOp::NotEquals, value)
}

pub fn less_than<T: Model>(property: &str, value: impl Into<Value>) -> CoreResult<Predicate<T>> {
    compare(property, FilterOp::LessThan, value)
}

pub fn less_or_equal<T: Model>(property: &str, value: impl Into<Value>) -> CoreResult<Predicate<T>> {
    compare(property, FilterOp::LessOrEqual, value)
}

pub fn greater_than<T: Model>(property: &str, value: impl Into<Value>) -> CoreResult<Predicate<T>> {
    compare(property, FilterOp::GreaterThan, value)
}

pub fn greater_or_equal<T: Model>(
    property: &str,
    value: impl Into<Value>,
) -> CoreResult<Predicate<T>> {
    compare(property, FilterOp::GreaterOrEqual, value)
}

/// True when the stored value is null or empty text.
pub fn is_null_or_empty<T: Model>(property: &str) -> CoreResult<Predicate<T>> {
    compare(property, FilterOp::IsNullOrEmpty, Value::Null)
}

/// Case-insensitive substring test. A blank term matches everything.
pub fn contains<T: Model>(property: &str, term: impl Into<Value>) -> CoreResult<Predicate<T>> {
    compare(property, FilterOp::Contains, term)
}

/// Equality over every primary key part, in declaration order.
///
/// ## Errors
/// - `MissingPrimaryKey` if `T` declares no key
/// - `KeyArity` if the number of values differs from the key length
/// - `TypeMismatch` if a value is null or has the wrong type
pub fn key_equality<T: Model>(key_values: &[Value]) -> CoreResult<Predicate<T>> {
    let descriptor = describe::<T>();
    descriptor.encode_key(key_values)?;

    let parts = descriptor
        .primary_key()?
        .into_iter()
        .zip(key_values)
        .map(|(field, value)| equals::<T>(field.name, value.clone()))
        .collect::<CoreResult<Vec<_>>>()?;
    Ok(Predicate::all(parts))
}

/// Free-text search: `contains(term)` over every searchable property whose
/// operator set includes `contains`, joined with OR.
///
/// ## Errors
/// `NoSearchableFields` if the term is not blank and `T` has no such
/// property.
pub fn search<T: Model>(term: &str) -> CoreResult<Predicate<T>> {
    if term.trim().is_empty() {
        return Ok(Predicate::always());
    }

    let descriptor = describe::<T>();
    let fields: Vec<_> = descriptor
        .searchable_fields()
        .filter(|f| f.supports(FilterOp::Contains) && f.ty.is_textual())
        .map(|f| f.name)
        .collect();
    if fields.is_empty() {
        return Err(CoreError::NoSearchableFields {
            entity: descriptor.name().to_string(),
        });
    }

    let parts = fields
        .into_iter()
        .map(|name| contains::<T>(name, term))
        .collect::<CoreResult<Vec<_>>>()?;
    Ok(Predicate::any(parts))
}

// =============================================================================
// Unit Tests
// =============================================================================
