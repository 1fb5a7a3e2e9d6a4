//! Storage value representation.
//!
//! [`Value`] is the dynamic value type that crosses the boundary between the
//! model layer and a storage backend. [`ValueType`] names the storable
//! categories and is what scalar fields declare in the model.

use serde::{Deserialize, Serialize};

use crate::error::{Error, TypeError};

/// A dynamically typed storage value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL / absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer. All integral fields map here.
    BigInt(i64),
    /// 64-bit floating point.
    Double(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Structured JSON document.
    Json(serde_json::Value),
}

/// The storable categories a scalar field can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    BigInt,
    /// 64-bit floating point.
    Double,
    /// UTF-8 text.
    Text,
    /// Raw bytes.
    Bytes,
    /// Structured JSON document.
    Json,
}

impl ValueType {
    /// Returns the type of a non-null value, or `None` for [`Value::Null`].
    pub const fn of(value: &Value) -> Option<ValueType> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(ValueType::Bool),
            Value::BigInt(_) => Some(ValueType::BigInt),
            Value::Double(_) => Some(ValueType::Double),
            Value::Text(_) => Some(ValueType::Text),
            Value::Bytes(_) => Some(ValueType::Bytes),
            Value::Json(_) => Some(ValueType::Json),
        }
    }

    /// Returns `true` if `value` can be stored in a column of this type.
    ///
    /// `Null` is accepted by every type; nullability is a property of the
    /// column, not of the value type.
    pub const fn accepts(self, value: &Value) -> bool {
        match ValueType::of(value) {
            None => true,
            Some(ty) => ty as u8 == self as u8,
        }
    }

    /// Returns the lowercase name of this type.
    pub const fn name(self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::BigInt => "bigint",
            ValueType::Double => "double",
            ValueType::Text => "text",
            ValueType::Bytes => "bytes",
            ValueType::Json => "json",
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    /// Returns `true` if this is [`Value::Null`].
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the name of this value's type, `"null"` for null.
    pub const fn type_name(&self) -> &'static str {
        match ValueType::of(self) {
            None => "null",
            Some(ty) => ty.name(),
        }
    }

    /// Returns the boolean if this is a `Bool`.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer if this is a `BigInt`.
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Value::BigInt(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the float if this is a `Double`.
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the string slice if this is `Text`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the byte slice if this is `Bytes`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

fn conversion_error(expected: &'static str, value: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: format!("{value:?}"),
        column: None,
    })
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(conversion_error("bool", &other)),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::BigInt(i) => Ok(i),
            other => Err(conversion_error("i64", &other)),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Double(d) => Ok(d),
            Value::BigInt(i) => {
                #[allow(clippy::cast_precision_loss)]
                Ok(i as f64)
            }
            other => Err(conversion_error("f64", &other)),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(conversion_error("String", &other)),
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(conversion_error("Vec<u8>", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_of_maps_every_variant() {
        assert_eq!(ValueType::of(&Value::Null), None);
        assert_eq!(ValueType::of(&Value::Bool(true)), Some(ValueType::Bool));
        assert_eq!(ValueType::of(&Value::BigInt(7)), Some(ValueType::BigInt));
        assert_eq!(ValueType::of(&Value::Double(1.5)), Some(ValueType::Double));
        assert_eq!(
            ValueType::of(&Value::Text("x".to_string())),
            Some(ValueType::Text)
        );
        assert_eq!(
            ValueType::of(&Value::Bytes(vec![1, 2])),
            Some(ValueType::Bytes)
        );
        assert_eq!(
            ValueType::of(&Value::Json(serde_json::json!({"a": 1}))),
            Some(ValueType::Json)
        );
    }

    #[test]
    fn accepts_allows_null_and_matching_type_only() {
        assert!(ValueType::BigInt.accepts(&Value::Null));
        assert!(ValueType::BigInt.accepts(&Value::BigInt(42)));
        assert!(!ValueType::BigInt.accepts(&Value::Text("42".to_string())));
        assert!(ValueType::Text.accepts(&Value::Text(String::new())));
        assert!(!ValueType::Text.accepts(&Value::Bool(false)));
    }

    #[test]
    fn from_impls_produce_expected_variants() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i32), Value::BigInt(42));
        assert_eq!(Value::from(42i64), Value::BigInt(42));
        assert_eq!(Value::from(2.5f64), Value::Double(2.5));
        assert_eq!(Value::from("hi"), Value::Text("hi".to_string()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(9i64)), Value::BigInt(9));
    }

    #[test]
    fn try_from_converts_or_reports_type_error() {
        assert_eq!(i64::try_from(Value::BigInt(5)).unwrap(), 5);
        assert_eq!(String::try_from(Value::Text("a".to_string())).unwrap(), "a");
        assert!((f64::try_from(Value::BigInt(2)).unwrap() - 2.0).abs() < f64::EPSILON);

        let err = i64::try_from(Value::Text("five".to_string())).unwrap_err();
        match err {
            Error::Type(e) => {
                assert_eq!(e.expected, "i64");
                assert!(e.actual.contains("five"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn type_names_are_stable() {
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::BigInt(1).type_name(), "bigint");
        assert_eq!(ValueType::Json.name(), "json");
    }

    #[test]
    fn serde_round_trips_values() {
        let value = Value::Json(serde_json::json!({"tags": ["a", "b"]}));
        let encoded = serde_json::to_string(&value).unwrap();
        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, value);
    }
}
