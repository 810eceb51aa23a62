//! Declared attribute casts.
//!
//! A cast converts between the *storage* form kept in an entity's attribute map
//! (what gets bound to a statement) and the *cast* form returned by
//! [`Entity::get`](crate::Entity::get).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use quarry_core::{QuarryError, Result, STORAGE_DATE_FORMAT, Value};

use crate::encryption::Encrypter;

const DATE_FORMAT: &str = "%Y-%m-%d";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cast {
    Integer,
    Float,
    /// Strings `"1"`, `"true"`, `"yes"` and `"on"` are truthy
    Boolean,
    String,
    /// JSON object or array, stored as text
    Json,
    /// List of values, stored as a JSON array
    Collection,
    /// Text encrypted at rest
    Encrypted,
    DateTime,
    Date,
}

impl Cast {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Cast::Integer => "integer",
            Cast::Float => "float",
            Cast::Boolean => "boolean",
            Cast::String => "string",
            Cast::Json => "json",
            Cast::Collection => "collection",
            Cast::Encrypted => "encrypted",
            Cast::DateTime => "datetime",
            Cast::Date => "date",
        }
    }

    /// Converts an assigned value into its storage form.
    pub fn to_storage(&self, attribute: &str, value: Value, encrypter: Option<&Encrypter>) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let format_err = |message: String| QuarryError::CastFormat {
            attribute: attribute.to_string(),
            message,
        };
        Ok(match self {
            Cast::Integer => Value::Int(to_integer(&value).ok_or_else(|| {
                format_err(format!("expected an integer, got {}", value.type_name()))
            })?),
            Cast::Float => Value::Float(value.as_f64().ok_or_else(|| {
                format_err(format!("expected a number, got {}", value.type_name()))
            })?),
            Cast::Boolean => Value::Bool(truthy(&value)),
            Cast::String => Value::Text(value.to_string()),
            Cast::Json => Value::Text(match value {
                Value::Text(text) => {
                    serde_json::from_str::<serde_json::Value>(&text)
                        .map_err(|e| format_err(format!("invalid JSON: {e}")))?;
                    text
                }
                other => other.to_json().to_string(),
            }),
            Cast::Collection => {
                let items = match value {
                    Value::List(items) => items,
                    Value::Json(serde_json::Value::Array(items)) => {
                        items.into_iter().map(json_to_value).collect()
                    }
                    Value::Text(text) => parse_list(&text).map_err(format_err)?,
                    other => vec![other],
                };
                Value::Text(Value::List(items).to_json().to_string())
            }
            Cast::Encrypted => {
                let encrypter = encrypter.ok_or(QuarryError::MissingEncryptionKey)?;
                Value::Text(encrypter.encrypt(&value.to_string())?)
            }
            Cast::DateTime => Value::Text(
                parse_datetime(&value)
                    .map_err(format_err)?
                    .format(STORAGE_DATE_FORMAT)
                    .to_string(),
            ),
            Cast::Date => Value::Text(
                parse_datetime(&value)
                    .map_err(format_err)?
                    .format(DATE_FORMAT)
                    .to_string(),
            ),
        })
    }

    /// Converts a storage value into the form handed to callers.
    pub fn from_storage(&self, attribute: &str, value: &Value, encrypter: Option<&Encrypter>) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let format_err = |message: String| QuarryError::CastFormat {
            attribute: attribute.to_string(),
            message,
        };
        Ok(match self {
            Cast::Integer => to_integer(value).map_or(Value::Null, Value::Int),
            Cast::Float => value.as_f64().map_or(Value::Null, Value::Float),
            Cast::Boolean => Value::Bool(truthy(value)),
            Cast::String => Value::Text(value.to_string()),
            Cast::Json => match value {
                Value::Text(text) => serde_json::from_str::<serde_json::Value>(text)
                    .map(Value::from)
                    .map_err(|e| format_err(format!("invalid JSON: {e}")))?,
                Value::Bytes(bytes) => serde_json::from_slice::<serde_json::Value>(bytes)
                    .map(Value::from)
                    .map_err(|e| format_err(format!("invalid JSON: {e}")))?,
                other => other.clone(),
            },
            Cast::Collection => match value {
                Value::Text(text) => Value::List(parse_list(text).map_err(format_err)?),
                Value::List(items) => Value::List(items.clone()),
                other => Value::List(vec![other.clone()]),
            },
            Cast::Encrypted => {
                let encrypter = encrypter.ok_or(QuarryError::MissingEncryptionKey)?;
                let payload = value.as_str().ok_or_else(|| {
                    QuarryError::Decryption(format!("`{attribute}` is not an encrypted payload"))
                })?;
                Value::Text(encrypter.decrypt(payload)?)
            }
            Cast::DateTime | Cast::Date => Value::DateTime(parse_datetime(value).map_err(format_err)?),
        })
    }
}

impl fmt::Display for Cast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cast {
    type Err = QuarryError;

    /// Parses a cast name such as `"int"`, `"bool"`, `"array"` or `"datetime"`.
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => Cast::Integer,
            "float" | "double" | "real" | "decimal" => Cast::Float,
            "bool" | "boolean" => Cast::Boolean,
            "string" => Cast::String,
            "json" | "array" | "object" => Cast::Json,
            "collection" => Cast::Collection,
            "encrypted" => Cast::Encrypted,
            "datetime" | "timestamp" => Cast::DateTime,
            "date" => Cast::Date,
            _ => {
                return Err(QuarryError::InvalidCast {
                    attribute: String::new(),
                    cast: s.to_string(),
                });
            }
        })
    }
}

fn to_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Float(f) => Some(f.trunc() as i64),
        Value::Text(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f.trunc() as i64)),
        other => other.as_i64(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Text(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Value::Null => false,
        _ => true,
    }
}

fn parse_list(text: &str) -> std::result::Result<Vec<Value>, String> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Array(items)) => Ok(items.into_iter().map(json_to_value).collect()),
        Ok(other) => Err(format!("expected a JSON array, got {other}")),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

/// JSON scalars become native values; arrays and objects stay JSON.
pub fn json_to_value(json: serde_json::Value) -> Value {
    use serde_json::Value as J;
    match json {
        J::Null => Value::Null,
        J::Bool(b) => Value::Bool(b),
        J::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Float))
            .unwrap_or(Value::Null),
        J::String(s) => Value::Text(s),
        other => Value::Json(other),
    }
}

/// Parses a date-time from any supported representation.
pub fn parse_datetime(value: &Value) -> std::result::Result<NaiveDateTime, String> {
    match value {
        Value::DateTime(dt) => Ok(*dt),
        Value::Int(ts) => DateTime::from_timestamp(*ts, 0)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| format!("timestamp {ts} out of range")),
        Value::Text(text) => {
            let text = text.trim();
            for format in DATETIME_FORMATS {
                if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
                    return Ok(dt);
                }
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                return Ok(dt.naive_utc());
            }
            NaiveDate::parse_from_str(text, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .ok_or_else(|| format!("unrecognized date-time `{text}`"))
        }
        other => Err(format!("cannot read a date-time from {}", other.type_name())),
    }
}
