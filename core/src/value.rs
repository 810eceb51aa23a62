//! Dynamic attribute and parameter values
//!
//! [`Value`] is what flows through the attribute store, the parameter list of a
//! compiled statement and the rows a driver hands back. [`ModelKey`] is the
//! hashable projection used whenever rows are grouped or keyed by a column.

use std::fmt;

use chrono::NaiveDateTime;

/// Storage format used when a date-time is bound as a parameter.
pub const STORAGE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single column value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    DateTime(NaiveDateTime),
    /// Output of the collection cast; bound as a JSON array.
    List(Vec<Value>),
}

impl Value {
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(json) => Some(json),
            _ => None,
        }
    }

    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Json(_) => "json",
            Value::DateTime(_) => "datetime",
            Value::List(_) => "list",
        }
    }

    /// The hashable key form of this value, or `None` for NULL.
    ///
    /// Numeric text normalizes to an integer key so a `"1"` foreign key matches
    /// an integer primary key of `1`.
    pub fn to_key(&self) -> Option<ModelKey> {
        match self {
            Value::Null => None,
            Value::Int(i) => Some(ModelKey::Int(*i)),
            Value::Bool(b) => Some(ModelKey::Int(i64::from(*b))),
            Value::Float(f) if f.fract() == 0.0 => Some(ModelKey::Int(*f as i64)),
            Value::Text(s) => Some(match s.parse::<i64>() {
                Ok(i) if i.to_string() == *s => ModelKey::Int(i),
                _ => ModelKey::Text(s.clone()),
            }),
            other => Some(ModelKey::Text(other.to_string())),
        }
    }

    /// Converts to a JSON value for serialization.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_with(STORAGE_DATE_FORMAT)
    }

    /// Converts to JSON, rendering date-times with `date_format`.
    pub fn to_json_with(&self, date_format: &str) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::Text(s) => J::String(s.clone()),
            Value::Bytes(b) => J::String(String::from_utf8_lossy(b).into_owned()),
            Value::Json(json) => json.clone(),
            Value::DateTime(dt) => J::String(dt.format(date_format).to_string()),
            Value::List(items) => J::Array(
                items
                    .iter()
                    .map(|item| item.to_json_with(date_format))
                    .collect(),
            ),
        }
    }

    /// The primitive form handed to a driver: JSON, lists and date-times are
    /// flattened to text.
    pub fn to_bindable(&self) -> Value {
        match self {
            Value::Json(json) => Value::Text(json.to_string()),
            Value::List(_) => Value::Text(self.to_json().to_string()),
            Value::DateTime(dt) => Value::Text(dt.format(STORAGE_DATE_FORMAT).to_string()),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Value::Json(json) => write!(f, "{json}"),
            Value::DateTime(dt) => write!(f, "{}", dt.format(STORAGE_DATE_FORMAT)),
            Value::List(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            other => Value::Json(other),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::Text(value.clone())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(value: $t) -> Self {
                    Value::Int(i64::from(value))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(f64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl From<ModelKey> for Value {
    fn from(key: ModelKey) -> Self {
        match key {
            ModelKey::Int(i) => Value::Int(i),
            ModelKey::Text(s) => Value::Text(s),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Hashable, normalized key used for grouping and keyed lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelKey {
    Int(i64),
    Text(String),
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKey::Int(i) => write!(f, "{i}"),
            ModelKey::Text(s) => f.write_str(s),
        }
    }
}

/// Builds an ordered list of `(column, Value)` pairs.
///
/// ```
/// use quarry_core::{attrs, Value};
///
/// let attrs = attrs! { "title" => "Hello", "views" => 3 };
/// assert_eq!(attrs[1], ("views".to_string(), Value::Int(3)));
/// ```
#[macro_export]
macro_rules! attrs {
    () => {
        ::std::vec::Vec::<(::std::string::String, $crate::Value)>::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {
        ::std::vec![
            $(
                (::std::string::String::from($key), $crate::Value::from($value))
            ),+
        ]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_value_impls() {
        assert_eq!(Value::from("hello"), Value::Text("hello".into()));
        assert_eq!(Value::from(42i32), Value::Int(42));
        assert_eq!(Value::from(3.5f64), Value::Float(3.5));
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(Option::<i64>::None), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
        assert_eq!(Value::from(serde_json::Value::Null), Value::Null);
    }

    #[test]
    fn test_key_normalization() {
        assert_eq!(Value::Int(7).to_key(), Some(ModelKey::Int(7)));
        assert_eq!(Value::Text("7".into()).to_key(), Some(ModelKey::Int(7)));
        assert_eq!(Value::Text("007".into()).to_key(), Some(ModelKey::Text("007".into())));
        assert_eq!(Value::Float(2.0).to_key(), Some(ModelKey::Int(2)));
        assert_eq!(Value::Null.to_key(), None);
        assert_eq!(
            Value::Text("post".into()).to_key(),
            Some(ModelKey::Text("post".into()))
        );
    }

    #[test]
    fn test_bindable_flattens_structured_values() {
        let dt = NaiveDateTime::parse_from_str("2024-03-01 10:20:30", STORAGE_DATE_FORMAT).unwrap();
        assert_eq!(
            Value::DateTime(dt).to_bindable(),
            Value::Text("2024-03-01 10:20:30".into())
        );
        assert_eq!(
            Value::Json(serde_json::json!({"a": 1})).to_bindable(),
            Value::Text(r#"{"a":1}"#.into())
        );
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Text("b".into())]).to_bindable(),
            Value::Text(r#"[1,"b"]"#.into())
        );
        assert_eq!(Value::Int(5).to_bindable(), Value::Int(5));
    }

    #[test]
    fn test_attrs_macro() {
        let attrs = attrs! { "a" => 1, "b" => "two", "c" => Option::<i32>::None };
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[0], ("a".to_string(), Value::Int(1)));
        assert_eq!(attrs[2].1, Value::Null);
        let empty = attrs! {};
        assert!(empty.is_empty());
    }
}
