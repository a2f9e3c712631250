//! Canonical URLs of the properties, classes and datatypes the core relies on.

/// MIME type of the JSON-AD wire format.
pub const JSON_AD_MIME: &str = "application/ad+json";

// Commit fields
pub const SUBJECT: &str = "https://atomicdata.dev/properties/subject";
pub const CREATED_AT: &str = "https://atomicdata.dev/properties/createdAt";
pub const SET: &str = "https://atomicdata.dev/properties/set";
pub const REMOVE: &str = "https://atomicdata.dev/properties/remove";
pub const DESTROY: &str = "https://atomicdata.dev/properties/destroy";
pub const SIGNER: &str = "https://atomicdata.dev/properties/signer";
pub const SIGNATURE: &str = "https://atomicdata.dev/properties/signature";
pub const LAST_COMMIT: &str = "https://atomicdata.dev/properties/lastCommit";

// Generic properties
pub const IS_A: &str = "https://atomicdata.dev/properties/isA";
pub const PARENT: &str = "https://atomicdata.dev/properties/parent";
pub const WRITE: &str = "https://atomicdata.dev/properties/write";
pub const READ: &str = "https://atomicdata.dev/properties/read";
pub const NAME: &str = "https://atomicdata.dev/properties/name";
pub const DATATYPE: &str = "https://atomicdata.dev/properties/datatype";
pub const SHORTNAME: &str = "https://atomicdata.dev/properties/shortname";
pub const DESCRIPTION: &str = "https://atomicdata.dev/properties/description";
pub const CLASSTYPE: &str = "https://atomicdata.dev/properties/classtype";
pub const PUBLIC_KEY: &str = "https://atomicdata.dev/properties/publicKey";

// Collections
pub const COLLECTION_MEMBERS: &str = "https://atomicdata.dev/properties/collection/members";
pub const COLLECTION_TOTAL_MEMBERS: &str =
    "https://atomicdata.dev/properties/collection/totalMembers";
pub const COLLECTION_PAGE_SIZE: &str = "https://atomicdata.dev/properties/collection/pageSize";
pub const COLLECTION_CURRENT_PAGE: &str =
    "https://atomicdata.dev/properties/collection/currentPage";

// Classes
pub const COMMIT: &str = "https://atomicdata.dev/classes/Commit";
pub const PROPERTY: &str = "https://atomicdata.dev/classes/Property";
pub const AGENT: &str = "https://atomicdata.dev/classes/Agent";
pub const COLLECTION: &str = "https://atomicdata.dev/classes/Collection";

// Datatypes
pub const ATOMIC_URL: &str = "https://atomicdata.dev/datatypes/atomicURL";
pub const BOOLEAN: &str = "https://atomicdata.dev/datatypes/boolean";
pub const DATE: &str = "https://atomicdata.dev/datatypes/date";
pub const FLOAT: &str = "https://atomicdata.dev/datatypes/float";
pub const INTEGER: &str = "https://atomicdata.dev/datatypes/integer";
pub const MARKDOWN: &str = "https://atomicdata.dev/datatypes/markdown";
pub const RESOURCE_ARRAY: &str = "https://atomicdata.dev/datatypes/resourceArray";
pub const SLUG: &str = "https://atomicdata.dev/datatypes/slug";
pub const STRING: &str = "https://atomicdata.dev/datatypes/string";
pub const TIMESTAMP: &str = "https://atomicdata.dev/datatypes/timestamp";
