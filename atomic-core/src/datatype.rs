use std::fmt;

use serde_json::Value as Json;
use url::Url;

use crate::error::AtomicError;
use crate::urls;

/// The closed set of datatypes a Property can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datatype {
    AtomicUrl,
    Boolean,
    Date,
    Float,
    Integer,
    Markdown,
    ResourceArray,
    Slug,
    String,
    Timestamp,
    /// Any datatype URL this client does not recognise. Performs no validation.
    Unknown,
}

impl Datatype {
    /// Maps a datatype URL to a variant. Unrecognised URLs become `Unknown`.
    pub fn from_url(url: &str) -> Self {
        match url {
            urls::ATOMIC_URL => Datatype::AtomicUrl,
            urls::BOOLEAN => Datatype::Boolean,
            urls::DATE => Datatype::Date,
            urls::FLOAT => Datatype::Float,
            urls::INTEGER => Datatype::Integer,
            urls::MARKDOWN => Datatype::Markdown,
            urls::RESOURCE_ARRAY => Datatype::ResourceArray,
            urls::SLUG => Datatype::Slug,
            urls::STRING => Datatype::String,
            urls::TIMESTAMP => Datatype::Timestamp,
            _ => Datatype::Unknown,
        }
    }

    /// Returns the canonical URL, or `None` for `Unknown`.
    pub fn url(&self) -> Option<&'static str> {
        Some(match self {
            Datatype::AtomicUrl => urls::ATOMIC_URL,
            Datatype::Boolean => urls::BOOLEAN,
            Datatype::Date => urls::DATE,
            Datatype::Float => urls::FLOAT,
            Datatype::Integer => urls::INTEGER,
            Datatype::Markdown => urls::MARKDOWN,
            Datatype::ResourceArray => urls::RESOURCE_ARRAY,
            Datatype::Slug => urls::SLUG,
            Datatype::String => urls::STRING,
            Datatype::Timestamp => urls::TIMESTAMP,
            Datatype::Unknown => return None,
        })
    }

    /// Checks that a native JSON value is acceptable for this datatype.
    ///
    /// For resource arrays, validation stops at the first invalid element and
    /// the error carries its index.
    pub fn validate(&self, value: &Json) -> Result<(), AtomicError> {
        match self {
            Datatype::AtomicUrl => {
                let s = expect_str(value, "URL")?;
                check_url(s)
            }
            Datatype::Boolean => match value {
                Json::Bool(_) => Ok(()),
                _ => Err(AtomicError::validation("not a boolean")),
            },
            Datatype::Date => {
                let s = expect_str(value, "date")?;
                if is_date(s) {
                    Ok(())
                } else {
                    Err(AtomicError::validation(format!(
                        "{s:?} is not a date, expected YYYY-MM-DD"
                    )))
                }
            }
            Datatype::Float => match value {
                Json::Number(_) => Ok(()),
                _ => Err(AtomicError::validation("not a number")),
            },
            Datatype::Integer | Datatype::Timestamp => match value {
                Json::Number(n) if is_whole(n) => Ok(()),
                Json::Number(_) => Err(AtomicError::validation("not a whole number")),
                _ => Err(AtomicError::validation("not a number")),
            },
            Datatype::Markdown | Datatype::String => expect_str(value, "string").map(|_| ()),
            Datatype::ResourceArray => {
                let Json::Array(items) = value else {
                    return Err(AtomicError::validation("not an array"));
                };
                for (index, item) in items.iter().enumerate() {
                    let valid = match item {
                        Json::String(s) => check_url(s).is_ok(),
                        _ => false,
                    };
                    if !valid {
                        return Err(AtomicError::Validation {
                            message: format!("{item} is not a valid URL"),
                            index: Some(index),
                        });
                    }
                }
                Ok(())
            }
            Datatype::Slug => {
                let s = expect_str(value, "slug")?;
                if is_slug(s) {
                    Ok(())
                } else {
                    Err(AtomicError::validation(format!(
                        "{s:?} is not a slug, only lowercase letters, digits and single dashes are allowed"
                    )))
                }
            }
            Datatype::Unknown => Ok(()),
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Datatype::AtomicUrl => "atomic-url",
            Datatype::Boolean => "boolean",
            Datatype::Date => "date",
            Datatype::Float => "float",
            Datatype::Integer => "integer",
            Datatype::Markdown => "markdown",
            Datatype::ResourceArray => "resource-array",
            Datatype::Slug => "slug",
            Datatype::String => "string",
            Datatype::Timestamp => "timestamp",
            Datatype::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

fn expect_str<'a>(value: &'a Json, what: &str) -> Result<&'a str, AtomicError> {
    value
        .as_str()
        .ok_or_else(|| AtomicError::validation(format!("{what} must be a string")))
}

fn check_url(s: &str) -> Result<(), AtomicError> {
    Url::parse(s)
        .map(|_| ())
        .map_err(|e| AtomicError::validation(format!("{s:?} is not a valid URL: {e}")))
}

fn is_whole(n: &serde_json::Number) -> bool {
    if n.is_i64() || n.is_u64() {
        return true;
    }
    n.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
}

/// `^[a-z0-9]+(-[a-z0-9]+)*$`
pub(crate) fn is_slug(s: &str) -> bool {
    !s.is_empty()
        && s.split('-').all(|part| {
            !part.is_empty() && part.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        })
}

/// `YYYY-MM-DD`, month 01-12, day 01-31.
pub(crate) fn is_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return false;
    }
    let digits = |range: std::ops::Range<usize>| {
        bytes[range.clone()].iter().all(u8::is_ascii_digit).then(|| {
            bytes[range]
                .iter()
                .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'))
        })
    };
    match (digits(0..4), digits(5..7), digits(8..10)) {
        (Some(_), Some(month), Some(day)) => (1..=12).contains(&month) && (1..=31).contains(&day),
        _ => false,
    }
}
