//! JSON-AD decoding.
//!
//! JSON-AD is JSON in which every key of an object is a property URL and the
//! optional `@id` key names the resource. Nested objects that carry an `@id`
//! are resources in their own right: they go into the store and the parent
//! keeps only their URL. Nested objects without `@id` are anonymous and stay
//! embedded in the parent.

use serde_json::Value as Json;

use crate::error::AtomicError;
use crate::resource::{Resource, ResourceStatus, UNKNOWN_SUBJECT};
use crate::store::Store;
use crate::value::{SubResource, Value};

/// The shapes a JSON-AD value can take.
enum WireValue<'a> {
    /// String, number or boolean.
    Primitive(Value),
    /// A string inside an array: the URL of another resource.
    Reference(&'a str),
    Named { subject: &'a str, json: &'a Json },
    Anonymous(&'a Json),
    Array(&'a [Json]),
}

impl<'a> WireValue<'a> {
    fn classify(json: &'a Json, in_array: bool) -> Result<Self, AtomicError> {
        Ok(match json {
            Json::Null => return Err(AtomicError::Parse("null is not a valid value".into())),
            Json::String(s) if in_array => WireValue::Reference(s),
            Json::Array(_) if in_array => {
                return Err(AtomicError::Parse("arrays cannot be nested".into()));
            }
            Json::Array(items) => WireValue::Array(items),
            Json::Object(map) => match map.get("@id") {
                Some(Json::String(subject)) => WireValue::Named { subject, json },
                Some(other) => {
                    return Err(AtomicError::Parse(format!("@id must be a string, got {other}")));
                }
                None => WireValue::Anonymous(json),
            },
            Json::Bool(_) | Json::Number(_) | Json::String(_) if in_array => {
                return Err(AtomicError::Parse(format!(
                    "array elements must be URLs or resources, got {json}"
                )));
            }
            primitive => WireValue::Primitive(Value::try_from(primitive.clone())?),
        })
    }
}

/// Fills `resource` from a JSON-AD object.
///
/// A present `@id` must match the resource's subject, unless the subject is
/// still the placeholder. Named nested resources are added to `store`. On
/// failure the resource is marked as errored, added to `store` in that
/// state, and the error is returned.
pub fn parse_json_ad_resource(
    json: &Json,
    resource: &mut Resource,
    store: Option<&Store>,
) -> Result<(), AtomicError> {
    match parse_into(json, resource, store) {
        Ok(()) => {
            resource.set_status(ResourceStatus::Ready);
            Ok(())
        }
        Err(e) => {
            resource.set_error(e.clone());
            if let Some(store) = store
                && resource.get_subject() != UNKNOWN_SUBJECT
            {
                store.add_resource(resource.clone());
            }
            Err(e)
        }
    }
}

/// Parses a JSON-AD array of resources.
///
/// Elements without an `@id` keep the [`UNKNOWN_SUBJECT`] placeholder.
pub fn parse_json_ad_array(
    json: &Json,
    store: Option<&Store>,
) -> Result<Vec<Resource>, AtomicError> {
    let Json::Array(items) = json else {
        return Err(AtomicError::Parse(format!("expected a JSON-AD array, got {json}")));
    };
    items
        .iter()
        .map(|item| {
            let mut resource = Resource::new(UNKNOWN_SUBJECT);
            parse_json_ad_resource(item, &mut resource, store)?;
            Ok(resource)
        })
        .collect()
}

/// Parses JSON-AD text into the resource for `subject`.
pub fn parse_json_ad_string(
    text: &str,
    subject: &str,
    store: Option<&Store>,
) -> Result<Resource, AtomicError> {
    let json: Json = serde_json::from_str(text)?;
    let mut resource = Resource::new(subject);
    parse_json_ad_resource(&json, &mut resource, store)?;
    Ok(resource)
}

/// Decodes the value of a single property, as found in a resource or in a
/// commit's `set` map.
pub(crate) fn parse_property_value(
    json: &Json,
    store: Option<&Store>,
) -> Result<Value, AtomicError> {
    match WireValue::classify(json, false)? {
        WireValue::Primitive(value) => Ok(value),
        WireValue::Named { subject, json } => {
            parse_named(subject, json, store)?;
            Ok(Value::String(subject.to_string()))
        }
        WireValue::Anonymous(json) => Ok(Value::Resource(Box::new(parse_anonymous(json, store)?))),
        WireValue::Array(items) => items
            .iter()
            .map(|item| match WireValue::classify(item, true)? {
                WireValue::Reference(subject) => Ok(SubResource::Subject(subject.to_string())),
                WireValue::Named { subject, json } => {
                    parse_named(subject, json, store)?;
                    Ok(SubResource::Subject(subject.to_string()))
                }
                WireValue::Anonymous(json) => {
                    Ok(SubResource::Nested(Box::new(parse_anonymous(json, store)?)))
                }
                WireValue::Primitive(_) | WireValue::Array(_) => Err(AtomicError::Parse(format!(
                    "array elements must be URLs or resources, got {item}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::ResourceArray),
        WireValue::Reference(subject) => Ok(Value::String(subject.to_string())),
    }
}

fn parse_into(
    json: &Json,
    resource: &mut Resource,
    store: Option<&Store>,
) -> Result<(), AtomicError> {
    let Json::Object(map) = json else {
        return Err(AtomicError::Parse(format!("expected a JSON-AD object, got {json}")));
    };

    if let Some(id) = map.get("@id") {
        let id = id
            .as_str()
            .ok_or_else(|| AtomicError::Parse(format!("@id must be a string, got {id}")))?;
        let current = resource.get_subject();
        if current != UNKNOWN_SUBJECT && current != id {
            return Err(AtomicError::Parse(format!(
                "@id {id} does not match subject {current}"
            )));
        }
        if current != id {
            resource.set_subject(id);
        }
    }

    for (key, value) in map {
        if key == "@id" {
            continue;
        }
        let parsed = parse_property_value(value, store).map_err(|e| {
            AtomicError::Parse(format!(
                "key {key} with value {value} in {}: {e}",
                resource.get_subject()
            ))
        })?;
        resource.set_unsafe(key.clone(), parsed);
    }
    Ok(())
}

fn parse_named(subject: &str, json: &Json, store: Option<&Store>) -> Result<(), AtomicError> {
    let mut nested = Resource::new(subject);
    parse_json_ad_resource(json, &mut nested, store)?;
    if let Some(store) = store {
        store.add_resource(nested);
    }
    Ok(())
}

fn parse_anonymous(json: &Json, store: Option<&Store>) -> Result<Resource, AtomicError> {
    let mut nested = Resource::new(UNKNOWN_SUBJECT);
    parse_into(json, &mut nested, store)?;
    nested.set_status(ResourceStatus::Ready);
    Ok(nested)
}
