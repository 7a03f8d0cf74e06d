//! # Property Values
//!
//! Dynamically typed values read from entity properties, and the declared
//! property types they are checked against.
//!
//! ## Value Families
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Value vs ValueType                              │
//! │                                                                         │
//! │  ValueType (declared in Schema)     Value (read from an entity)        │
//! │  ──────────────────────────────     ───────────────────────────        │
//! │  Bool                          ◄──  Bool(true)                         │
//! │  Int                           ◄──  Int(42)                            │
//! │  Float                         ◄──  Float(1.5), Int(2) (widened)       │
//! │  Text                          ◄──  Text("Acme")                       │
//! │  Uuid                          ◄──  Uuid(..), Text("550e..") (parsed)  │
//! │  Timestamp                     ◄──  Timestamp(..), Text(RFC 3339)      │
//! │  Enum(["rock", "jazz"])        ◄──  Text("rock")                       │
//! │  Model(Artist::schema)         ◄──  Record({ "name": Text(..) })       │
//! │                                                                         │
//! │  Null is accepted by every type (optional properties).                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::Schema;

// =============================================================================
// Value
// =============================================================================

/// A property value.
///
/// Serializes to plain JSON: uuids and timestamps become strings, which
/// [`ValueType::coerce`] parses back when a typed property asks for them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    /// Nested model, keyed by property name.
    Record(BTreeMap<String, Value>),
    List(Vec<Value>),
}

impl Value {
    /// Returns true for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for `Null` or a zero-length text.
    pub fn is_null_or_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Short name of the value's family, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Uuid(_) => "uuid",
            Value::Timestamp(_) => "timestamp",
            Value::Record(_) => "record",
            Value::List(_) => "list",
        }
    }

    /// String view for text-like values (`contains` operates on this).
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Value::Text(s) => Some(Cow::Borrowed(s.as_str())),
            Value::Uuid(u) => Some(Cow::Owned(u.to_string())),
            _ => None,
        }
    }

    /// Compares two values of the same family.
    ///
    /// Ints and floats compare numerically. Returns `None` when the values
    /// are not comparable (different families, `Null`, records, lists).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality used by predicates: numeric families compare by value,
    /// `Null` equals only `Null`.
    pub fn matches(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    /// Total order used for sorting.
    ///
    /// `Null` sorts first; values from different families are ordered by
    /// family so a sort never panics on heterogeneous data.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
            _ => match self.rank().cmp(&other.rank()) {
                Ordering::Equal => self.compare(other).unwrap_or(Ordering::Equal),
                unequal => unequal,
            },
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::Uuid(_) => 4,
            Value::Timestamp(_) => 5,
            Value::Record(_) => 6,
            Value::List(_) => 7,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "\"{s}\""),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Record(_) | Value::List(_) => {
                write!(f, "{}", serde_json::Value::from(self.clone()))
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Conversions
// -----------------------------------------------------------------------------

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Record(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(x) => serde_json::Number::from_f64(x)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s),
            Value::Uuid(u) => serde_json::Value::String(u.to_string()),
            Value::Timestamp(t) => serde_json::Value::String(t.to_rfc3339()),
            Value::Record(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Text(s.clone())
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

// =============================================================================
// Value Type
// =============================================================================

/// Produces the schema of a nested model.
pub type SchemaFn = fn() -> Schema;

/// Declared type of a property.
#[derive(Clone, Copy)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Text,
    Uuid,
    Timestamp,
    /// Text restricted to a fixed set of variants.
    Enum(&'static [&'static str]),
    /// Nested model (embedded value or relation).
    Model(SchemaFn),
}

impl ValueType {
    /// Types that support `<`, `<=`, `>`, `>=`.
    pub fn is_comparable(&self) -> bool {
        matches!(self, ValueType::Int | ValueType::Float | ValueType::Timestamp)
    }

    /// Types whose values have a string form `contains` can search.
    pub fn is_textual(&self) -> bool {
        matches!(self, ValueType::Text | ValueType::Enum(_) | ValueType::Uuid)
    }

    /// Types that can terminate an order path.
    pub fn is_orderable(&self) -> bool {
        !matches!(self, ValueType::Model(_))
    }

    /// Returns the nested schema for model types.
    pub fn nested(&self) -> Option<Schema> {
        match self {
            ValueType::Model(schema) => Some(schema()),
            _ => None,
        }
    }

    /// Converts `value` into this type's canonical representation.
    ///
    /// Returns `None` if the value cannot represent this type. `Null` is
    /// always accepted.
    pub fn coerce(&self, value: Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (ValueType::Bool, v @ Value::Bool(_)) => Some(v),
            (ValueType::Int, v @ Value::Int(_)) => Some(v),
            (ValueType::Float, v @ Value::Float(_)) => Some(v),
            (ValueType::Float, Value::Int(i)) => Some(Value::Float(i as f64)),
            (ValueType::Text, v @ Value::Text(_)) => Some(v),
            (ValueType::Enum(variants), Value::Text(s)) => {
                variants.contains(&s.as_str()).then_some(Value::Text(s))
            }
            (ValueType::Uuid, v @ Value::Uuid(_)) => Some(v),
            (ValueType::Uuid, Value::Text(s)) => Uuid::parse_str(&s).ok().map(Value::Uuid),
            (ValueType::Timestamp, v @ Value::Timestamp(_)) => Some(v),
            (ValueType::Timestamp, Value::Text(s)) => DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|t| Value::Timestamp(t.with_timezone(&Utc))),
            (ValueType::Model(_), v @ Value::Record(_)) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Bool => f.write_str("bool"),
            ValueType::Int => f.write_str("int"),
            ValueType::Float => f.write_str("float"),
            ValueType::Text => f.write_str("text"),
            ValueType::Uuid => f.write_str("uuid"),
            ValueType::Timestamp => f.write_str("timestamp"),
            ValueType::Enum(variants) => write!(f, "one of {variants:?}"),
            ValueType::Model(_) => f.write_str("model"),
        }
    }
}

impl fmt::Debug for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
