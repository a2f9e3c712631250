//! Commits: signed, immutable descriptions of changes to a single resource.
//!
//! A [`CommitBuilder`] accumulates pending `set`/`remove`/`destroy` operations.
//! [`CommitBuilder::sign`] freezes a copy of it into a [`Commit`], signing the
//! deterministic serialization of every field except the signature itself.
//!
//! # Deterministic serialization
//!
//! Signatures are computed over, and verified against, one exact byte string:
//! empty `set`/`remove` and false `destroy` are omitted, fields use their
//! full property URLs, an `isA` marker is added, and object keys are sorted
//! lexicographically at every level. Two logically identical commits always
//! serialize identically, no matter in which order their fields were set.

use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use serde_json::{Map, Value as Json};

use crate::agent::{Agent, verify_signature};
use crate::error::AtomicError;
use crate::urls;

/// Wall-clock time in milliseconds since the epoch.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Mutable, unsigned set of pending changes for one subject.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitBuilder {
    subject: String,
    set: IndexMap<String, Json>,
    remove: Vec<String>,
    destroy: bool,
}

impl CommitBuilder {
    pub fn new(subject: impl Into<String>) -> Self {
        CommitBuilder {
            subject: subject.into(),
            ..Default::default()
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub(crate) fn set_subject(&mut self, subject: impl Into<String>) {
        self.subject = subject.into();
    }

    /// Records a new native value. Cancels a pending removal of the same property.
    pub fn set(&mut self, property: impl Into<String>, value: Json) {
        let property = property.into();
        self.remove.retain(|p| p != &property);
        self.set.insert(property, value);
    }

    /// Records the removal of a property. Drops any pending `set` for it.
    pub fn remove(&mut self, property: impl Into<String>) {
        let property = property.into();
        self.set.shift_remove(&property);
        if !self.remove.contains(&property) {
            self.remove.push(property);
        }
    }

    pub fn set_destroy(&mut self, destroy: bool) {
        self.destroy = destroy;
    }

    pub fn get_set(&self) -> &IndexMap<String, Json> {
        &self.set
    }

    pub fn get_remove(&self) -> &[String] {
        &self.remove
    }

    pub fn is_destroy(&self) -> bool {
        self.destroy
    }

    pub fn has_unsaved_changes(&self) -> bool {
        !self.set.is_empty() || !self.remove.is_empty() || self.destroy
    }

    /// Signs a snapshot of this builder.
    ///
    /// `created_at` is the wall-clock time in milliseconds since the epoch.
    /// Later edits to `self` never affect the returned commit.
    pub fn sign(&self, agent: &Agent, created_at: i64) -> Result<Commit, AtomicError> {
        let snapshot = self.clone();
        let signer = agent.subject().ok_or(AtomicError::AgentSubjectMissing)?;
        let mut commit = Commit {
            subject: snapshot.subject,
            created_at,
            signer: signer.to_string(),
            set: snapshot.set,
            remove: snapshot.remove,
            destroy: snapshot.destroy,
            signature: String::new(),
            id: None,
        };
        let serialized = commit.serialize_deterministically();
        commit.signature = agent.sign_message(serialized.as_bytes());
        Ok(commit)
    }
}

/// A signed commit. Once created it is never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    subject: String,
    created_at: i64,
    signer: String,
    set: IndexMap<String, Json>,
    remove: Vec<String>,
    destroy: bool,
    signature: String,
    id: Option<String>,
}

impl Commit {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn signer(&self) -> &str {
        &self.signer
    }

    pub fn set(&self) -> &IndexMap<String, Json> {
        &self.set
    }

    pub fn remove(&self) -> &[String] {
        &self.remove
    }

    pub fn destroy(&self) -> bool {
        self.destroy
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// URL of the commit, present when the commit came back from a server.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Attaches the URL a server assigned to this commit.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    fn unsigned_json(&self) -> Map<String, Json> {
        let mut map = Map::new();
        map.insert(urls::SUBJECT.into(), Json::String(self.subject.clone()));
        map.insert(urls::CREATED_AT.into(), Json::from(self.created_at));
        map.insert(urls::SIGNER.into(), Json::String(self.signer.clone()));
        map.insert(
            urls::IS_A.into(),
            Json::Array(vec![Json::String(urls::COMMIT.into())]),
        );
        if !self.set.is_empty() {
            let set = self.set.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            map.insert(urls::SET.into(), Json::Object(set));
        }
        if !self.remove.is_empty() {
            let remove = self.remove.iter().cloned().map(Json::String).collect();
            map.insert(urls::REMOVE.into(), Json::Array(remove));
        }
        if self.destroy {
            map.insert(urls::DESTROY.into(), Json::Bool(true));
        }
        map
    }

    /// The exact string the signature is computed over.
    pub fn serialize_deterministically(&self) -> String {
        serialize_deterministically(&Json::Object(self.unsigned_json()))
    }

    /// Signed wire form, as posted to a server and sent over the push channel.
    pub fn to_json_ad(&self) -> String {
        let mut map = self.unsigned_json();
        map.insert(urls::SIGNATURE.into(), Json::String(self.signature.clone()));
        if let Some(id) = &self.id {
            map.insert("@id".into(), Json::String(id.clone()));
        }
        serialize_deterministically(&Json::Object(map))
    }

    /// Decodes a serialized commit.
    pub fn from_json_ad(text: &str) -> Result<Self, AtomicError> {
        let json: Json = serde_json::from_str(text)?;
        let Json::Object(map) = json else {
            return Err(AtomicError::Parse("commit must be a JSON object".into()));
        };

        let required_str = |key: &str| -> Result<String, AtomicError> {
            map.get(key)
                .and_then(Json::as_str)
                .map(str::to_string)
                .ok_or_else(|| AtomicError::Parse(format!("commit is missing string {key}")))
        };

        let created_at = map
            .get(urls::CREATED_AT)
            .and_then(Json::as_i64)
            .ok_or_else(|| AtomicError::Parse(format!("commit is missing {}", urls::CREATED_AT)))?;

        let set: IndexMap<String, Json> = match map.get(urls::SET) {
            None => IndexMap::new(),
            Some(Json::Object(set)) => set.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Some(other) => {
                return Err(AtomicError::Parse(format!("commit set must be an object, got {other}")));
            }
        };

        let remove: Vec<String> = match map.get(urls::REMOVE) {
            None => Vec::new(),
            Some(Json::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        AtomicError::Parse(format!("commit remove entries must be strings, got {item}"))
                    })
                })
                .collect::<Result<_, _>>()?,
            Some(other) => {
                return Err(AtomicError::Parse(format!("commit remove must be an array, got {other}")));
            }
        };

        let destroy = match map.get(urls::DESTROY) {
            None => false,
            Some(Json::Bool(b)) => *b,
            Some(other) => {
                return Err(AtomicError::Parse(format!("commit destroy must be a boolean, got {other}")));
            }
        };

        Ok(Commit {
            subject: required_str(urls::SUBJECT)?,
            created_at,
            signer: required_str(urls::SIGNER)?,
            set,
            remove,
            destroy,
            signature: required_str(urls::SIGNATURE)?,
            id: map.get("@id").and_then(Json::as_str).map(str::to_string),
        })
    }

    /// Verifies the signature against the signer's base64 public key.
    pub fn verify(&self, public_key: &str) -> Result<(), AtomicError> {
        verify_signature(
            public_key,
            self.serialize_deterministically().as_bytes(),
            &self.signature,
        )
    }
}

/// Compact JSON with object keys sorted lexicographically at every level.
pub fn serialize_deterministically(value: &Json) -> String {
    let mut out = String::new();
    write_sorted(value, &mut out);
    out
}

fn write_sorted(value: &Json, out: &mut String) {
    match value {
        Json::Object(map) => {
            let mut entries: Vec<(&String, &Json)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Json::String(key.clone()).to_string());
                out.push(':');
                write_sorted(value, out);
            }
            out.push('}');
        }
        Json::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_sorted(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::{TEST_AGENT, TEST_PUBLIC_KEY, test_agent};
    use serde_json::json;

    const NEW_THING: &str = "https://localhost/new_thing";

    fn example_builder() -> CommitBuilder {
        let mut builder = CommitBuilder::new(NEW_THING);
        builder.set(urls::DESCRIPTION, json!("Some value"));
        builder.set(urls::SHORTNAME, json!("someval"));
        builder
    }

    #[test]
    fn signature_matches_known_value() {
        let commit = example_builder().sign(&test_agent(), 0).unwrap();

        let expected = format!(
            r#"{{"{}":0,"{}":["{}"],"{}":{{"{}":"Some value","{}":"someval"}},"{}":"{}","{}":"{}"}}"#,
            urls::CREATED_AT,
            urls::IS_A,
            urls::COMMIT,
            urls::SET,
            urls::DESCRIPTION,
            urls::SHORTNAME,
            urls::SIGNER,
            TEST_AGENT,
            urls::SUBJECT,
            NEW_THING,
        );
        assert_eq!(commit.serialize_deterministically(), expected);
        assert_eq!(
            commit.signature(),
            "kLh+mxy/lgFD6WkbIbhJANgRhyu39USL9up1zCmqU8Jmc+4rlvLZwxSlfxKTISP2BiXLSiz/5NJZrN5XpXJ/Cg=="
        );
        commit.verify(TEST_PUBLIC_KEY).unwrap();
    }

    #[test]
    fn serialization_ignores_insertion_order() {
        let mut reversed = CommitBuilder::new(NEW_THING);
        reversed.set(urls::SHORTNAME, json!("someval"));
        reversed.set(urls::DESCRIPTION, json!("Some value"));

        let agent = test_agent();
        let a = example_builder().sign(&agent, 42).unwrap();
        let b = reversed.sign(&agent, 42).unwrap();
        assert_eq!(a.serialize_deterministically(), b.serialize_deterministically());
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn nested_objects_are_sorted() {
        let value = json!({"b": {"z": 1, "a": [{"y": 2, "x": 1}]}, "a": true});
        assert_eq!(
            serialize_deterministically(&value),
            r#"{"a":true,"b":{"a":[{"x":1,"y":2}],"z":1}}"#
        );
    }

    #[test]
    fn empty_fields_are_omitted() {
        let commit = CommitBuilder::new(NEW_THING).sign(&test_agent(), 1).unwrap();
        let serialized = commit.serialize_deterministically();
        assert!(!serialized.contains(urls::SET));
        assert!(!serialized.contains(urls::REMOVE));
        assert!(!serialized.contains(urls::DESTROY));
    }

    #[test]
    fn set_and_remove_cancel_each_other() {
        let mut builder = CommitBuilder::new(NEW_THING);
        assert!(!builder.has_unsaved_changes());

        builder.set(urls::NAME, json!("first"));
        builder.remove(urls::NAME);
        assert!(builder.get_set().is_empty());
        assert_eq!(builder.get_remove(), [urls::NAME.to_string()]);

        builder.set(urls::NAME, json!("again"));
        assert!(builder.get_remove().is_empty());
        assert_eq!(builder.get_set().get(urls::NAME), Some(&json!("again")));

        builder.remove(urls::DESCRIPTION);
        builder.remove(urls::DESCRIPTION);
        assert_eq!(builder.get_remove().len(), 1);
        assert!(builder.has_unsaved_changes());
    }

    #[test]
    fn destroy_counts_as_change() {
        let mut builder = CommitBuilder::new(NEW_THING);
        builder.set_destroy(true);
        assert!(builder.has_unsaved_changes());
        let commit = builder.sign(&test_agent(), 5).unwrap();
        assert!(commit.destroy());
        assert!(commit.serialize_deterministically().contains(urls::DESTROY));
    }

    #[test]
    fn signed_commit_is_a_frozen_snapshot() {
        let mut builder = example_builder();
        let commit = builder.sign(&test_agent(), 0).unwrap();
        builder.set(urls::NAME, json!("edited later"));
        assert_eq!(commit.set().len(), 2);
        assert!(!commit.set().contains_key(urls::NAME));
    }

    #[test]
    fn signing_requires_agent_subject() {
        let agent = crate::Agent::generate(None);
        assert_eq!(
            example_builder().sign(&agent, 0),
            Err(AtomicError::AgentSubjectMissing)
        );
    }

    #[test]
    fn wire_form_decodes_back() {
        let mut builder = example_builder();
        builder.remove(urls::NAME);
        let commit = builder.sign(&test_agent(), 77).unwrap();

        let decoded = Commit::from_json_ad(&commit.to_json_ad()).unwrap();
        assert_eq!(decoded, commit);
        decoded.verify(TEST_PUBLIC_KEY).unwrap();
    }

    #[test]
    fn tampered_commit_fails_verification() {
        let commit = example_builder().sign(&test_agent(), 0).unwrap();
        let tampered = commit.to_json_ad().replace("Some value", "Other value");
        let decoded = Commit::from_json_ad(&tampered).unwrap();
        assert!(matches!(
            decoded.verify(TEST_PUBLIC_KEY),
            Err(AtomicError::InvalidSignature(_))
        ));
    }

    #[test]
    fn decoding_reports_missing_fields() {
        let err = Commit::from_json_ad(r#"{"https://atomicdata.dev/properties/subject":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, AtomicError::Parse(_)));
        assert!(Commit::from_json_ad("[1,2]").is_err());
        assert!(Commit::from_json_ad("not json").is_err());
    }
}
