use std::fmt;

use serde_json::{Number, Value as Json};
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::datatype::Datatype;
use crate::error::AtomicError;
use crate::resource::Resource;

/// A single property value held by a [`Resource`].
///
/// A `Value` never represents null: converting a JSON `null` fails.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Number(Number),
    Boolean(bool),
    ResourceArray(Vec<SubResource>),
    /// Anonymous nested resource, embedded inline in its parent.
    Resource(Box<Resource>),
}

/// One element of a resource array.
#[derive(Debug, Clone, PartialEq)]
pub enum SubResource {
    /// Reference to a resource by its URL.
    Subject(String),
    /// Anonymous resource without its own identity in the store.
    Nested(Box<Resource>),
}

impl Value {
    /// Validates `value` against `datatype` and converts it.
    pub fn new(value: Json, datatype: &Datatype) -> Result<Self, AtomicError> {
        datatype.validate(&value)?;
        Value::try_from(value)
    }

    /// Returns the native JSON form of this value.
    pub fn to_native(&self) -> Json {
        match self {
            Value::String(s) => Json::String(s.clone()),
            Value::Number(n) => Json::Number(n.clone()),
            Value::Boolean(b) => Json::Bool(*b),
            Value::ResourceArray(items) => Json::Array(
                items
                    .iter()
                    .map(|item| match item {
                        SubResource::Subject(s) => Json::String(s.clone()),
                        SubResource::Nested(r) => r.to_json_ad(),
                    })
                    .collect(),
            ),
            Value::Resource(r) => r.to_json_ad(),
        }
    }

    pub fn as_str(&self) -> Result<&str, AtomicError> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn to_number(&self) -> Result<f64, AtomicError> {
        match self {
            Value::Number(n) => n.as_f64().ok_or(AtomicError::TypeMismatch {
                expected: "number",
                found: "unrepresentable number",
            }),
            other => Err(other.mismatch("number")),
        }
    }

    /// Returns the value as a whole number. Fractional numbers are a mismatch.
    pub fn to_integer(&self) -> Result<i64, AtomicError> {
        match self {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .ok_or(AtomicError::TypeMismatch {
                    expected: "integer",
                    found: "fractional number",
                }),
            other => Err(other.mismatch("integer")),
        }
    }

    pub fn to_bool(&self) -> Result<bool, AtomicError> {
        match self {
            Value::Boolean(b) => Ok(*b),
            other => Err(other.mismatch("boolean")),
        }
    }

    /// Returns the subjects of a resource array.
    ///
    /// Fails if the array embeds an anonymous nested resource, since that
    /// element has no subject to return.
    pub fn to_array(&self) -> Result<Vec<String>, AtomicError> {
        match self {
            Value::ResourceArray(items) => items
                .iter()
                .map(|item| match item {
                    SubResource::Subject(s) => Ok(s.clone()),
                    SubResource::Nested(_) => Err(AtomicError::TypeMismatch {
                        expected: "subject",
                        found: "anonymous nested resource",
                    }),
                })
                .collect(),
            other => Err(other.mismatch("resource array")),
        }
    }

    /// Returns every element of a resource array, nested resources included.
    pub fn to_sub_resources(&self) -> Result<&[SubResource], AtomicError> {
        match self {
            Value::ResourceArray(items) => Ok(items),
            other => Err(other.mismatch("resource array")),
        }
    }

    /// Interprets a number as milliseconds since the epoch, or a string as `YYYY-MM-DD`.
    pub fn to_date(&self) -> Result<OffsetDateTime, AtomicError> {
        match self {
            Value::Number(_) => {
                let millis = self.to_integer()?;
                OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
                    .map_err(|e| AtomicError::validation(format!("invalid timestamp: {e}")))
            }
            Value::String(s) => {
                let date = Date::parse(s, format_description!("[year]-[month]-[day]"))
                    .map_err(|e| AtomicError::validation(format!("invalid date {s:?}: {e}")))?;
                Ok(date.midnight().assume_utc())
            }
            other => Err(other.mismatch("date")),
        }
    }

    pub fn as_resource(&self) -> Result<&Resource, AtomicError> {
        match self {
            Value::Resource(r) => Ok(r),
            other => Err(other.mismatch("nested resource")),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Boolean(_) => "boolean",
            Value::ResourceArray(_) => "resource array",
            Value::Resource(_) => "nested resource",
        }
    }

    fn mismatch(&self, expected: &'static str) -> AtomicError {
        AtomicError::TypeMismatch {
            expected,
            found: self.kind_name(),
        }
    }
}

/// Unchecked conversion from plain JSON. Nested objects are not accepted here;
/// they are decoded by the parser, which knows about `@id`.
impl TryFrom<Json> for Value {
    type Error = AtomicError;

    fn try_from(value: Json) -> Result<Self, Self::Error> {
        match value {
            Json::Null => Err(AtomicError::validation("value cannot be null")),
            Json::Bool(b) => Ok(Value::Boolean(b)),
            Json::Number(n) => Ok(Value::Number(n)),
            Json::String(s) => Ok(Value::String(s)),
            Json::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| match item {
                    Json::String(s) => Ok(SubResource::Subject(s)),
                    other => Err(AtomicError::Validation {
                        message: format!("expected a subject, got {other}"),
                        index: Some(index),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::ResourceArray),
            Json::Object(_) => Err(AtomicError::validation(
                "nested resources must be decoded by the parser",
            )),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<Vec<String>> for Value {
    fn from(subjects: Vec<String>) -> Self {
        Value::ResourceArray(subjects.into_iter().map(SubResource::Subject).collect())
    }
}

impl From<Resource> for Value {
    fn from(r: Resource) -> Self {
        Value::Resource(Box::new(r))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Number(n) => write!(f, "{n}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::ResourceArray(_) | Value::Resource(_) => write!(f, "{}", self.to_native()),
        }
    }
}
