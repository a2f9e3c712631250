use crate::datatype::Datatype;
use crate::error::AtomicError;
use crate::resource::Resource;
use crate::urls;

/// Schema information about a property, read from its Property resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub subject: String,
    pub datatype: Datatype,
    pub shortname: String,
    pub description: String,
    /// Class that values of this property should be instances of.
    pub class_type: Option<String>,
}

impl Property {
    /// Reads a Property from its resource. `datatype`, `shortname` and
    /// `description` are required; the error names the one that is missing.
    pub fn from_resource(resource: &Resource) -> Result<Self, AtomicError> {
        if let Some(error) = resource.get_error() {
            return Err(error.clone());
        }
        let subject = resource.get_subject();
        let required = |url: &str, name: &str| -> Result<String, AtomicError> {
            let value = resource
                .get(url)
                .ok_or_else(|| AtomicError::NotFound(format!("property {subject} has no {name}")))?;
            Ok(value.as_str()?.to_string())
        };

        Ok(Property {
            subject: subject.to_string(),
            datatype: Datatype::from_url(&required(urls::DATATYPE, "datatype")?),
            shortname: required(urls::SHORTNAME, "shortname")?,
            description: required(urls::DESCRIPTION, "description")?,
            class_type: resource
                .get(urls::CLASSTYPE)
                .and_then(|v| v.as_str().ok())
                .map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn property_resource() -> Resource {
        let mut r = Resource::new(urls::DESCRIPTION);
        r.set_unsafe(urls::DATATYPE, Value::from(urls::MARKDOWN));
        r.set_unsafe(urls::SHORTNAME, Value::from("description"));
        r.set_unsafe(urls::DESCRIPTION, Value::from("A longer text"));
        r
    }

    #[test]
    fn reads_all_fields() {
        let property = Property::from_resource(&property_resource()).unwrap();
        assert_eq!(property.datatype, Datatype::Markdown);
        assert_eq!(property.shortname, "description");
        assert_eq!(property.class_type, None);
    }

    #[test]
    fn missing_field_is_named() {
        let mut r = property_resource();
        r.remove_prop_val(urls::SHORTNAME);
        let err = Property::from_resource(&r).unwrap_err();
        assert!(matches!(err, AtomicError::NotFound(ref m) if m.contains("shortname")));
    }

    #[test]
    fn fetch_errors_propagate() {
        let mut r = property_resource();
        r.set_error(AtomicError::Network("offline".into()));
        assert_eq!(
            Property::from_resource(&r),
            Err(AtomicError::Network("offline".into()))
        );
    }
}
