use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::agent::Agent;
use crate::client::commit_endpoint;
use crate::commit::{CommitBuilder, now_millis};
use crate::error::AtomicError;
use crate::store::Store;
use crate::urls;
use crate::value::{SubResource, Value};

/// Placeholder subject for resources whose URL is not known yet.
pub const UNKNOWN_SUBJECT: &str = "unknown-subject";

/// Lifecycle of a [`Resource`]. Exactly one state at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceStatus {
    /// Being fetched.
    Loading,
    /// Fetching or parsing failed, see [`Resource::get_error`].
    Error,
    /// Holds the state last received from the server.
    Ready,
    /// Created locally, never saved.
    New,
}

/// Client-side copy of a linked-data resource: property URLs mapped to values.
///
/// The [`Store`] keeps the canonical copy of each resource. Callers get
/// clones, edit them, and hand them back through [`Resource::save`] or
/// [`Store::add_resource`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    subject: String,
    propvals: IndexMap<String, Value>,
    status: ResourceStatus,
    error: Option<AtomicError>,
    commit_builder: CommitBuilder,
    applied_commit_signatures: HashSet<String>,
}

impl Resource {
    /// A resource that is about to be fetched.
    pub fn new(subject: impl Into<String>) -> Self {
        Self::with_status(subject.into(), ResourceStatus::Loading)
    }

    /// A resource created locally, to be saved later.
    pub fn new_unsaved(subject: impl Into<String>) -> Self {
        Self::with_status(subject.into(), ResourceStatus::New)
    }

    fn with_status(subject: String, status: ResourceStatus) -> Self {
        Resource {
            commit_builder: CommitBuilder::new(subject.clone()),
            subject,
            propvals: IndexMap::new(),
            status,
            error: None,
            applied_commit_signatures: HashSet::new(),
        }
    }

    pub fn get_subject(&self) -> &str {
        &self.subject
    }

    pub fn set_subject(&mut self, subject: impl Into<String>) {
        self.subject = subject.into();
        self.commit_builder.set_subject(self.subject.clone());
    }

    /// Returns the value of a property, or `None` if it is not set.
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.propvals.get(property)
    }

    pub fn get_propvals(&self) -> &IndexMap<String, Value> {
        &self.propvals
    }

    /// The classes listed in `isA`.
    pub fn get_classes(&self) -> Vec<String> {
        self.get(urls::IS_A)
            .and_then(|v| v.to_array().ok())
            .unwrap_or_default()
    }

    /// Validates `value` against the property's datatype, stores it, and
    /// records it in the pending commit.
    ///
    /// The property definition is resolved through the store, which may fetch it.
    pub async fn set(
        &mut self,
        property: &str,
        value: Json,
        store: &Store,
    ) -> Result<Value, AtomicError> {
        let definition = store.get_property(property).await?;
        let value = Value::new(value, &definition.datatype).map_err(|e| match e {
            AtomicError::Validation { message, index } => AtomicError::Validation {
                message: format!("{}: {message}", definition.shortname),
                index,
            },
            other => other,
        })?;
        self.commit_builder.set(property, value.to_native());
        self.propvals.insert(property.to_string(), value.clone());
        Ok(value)
    }

    /// Stores a value without validation and without recording a change.
    ///
    /// Only for trusted data: parsed server responses and applied commits.
    pub fn set_unsafe(&mut self, property: impl Into<String>, value: Value) {
        self.propvals.insert(property.into(), value);
    }

    /// Deletes a property locally and records the removal in the pending commit.
    pub fn remove_prop_val(&mut self, property: &str) {
        self.propvals.shift_remove(property);
        self.commit_builder.remove(property);
    }

    pub(crate) fn remove_unsafe(&mut self, property: &str) {
        self.propvals.shift_remove(property);
    }

    pub fn get_status(&self) -> ResourceStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ResourceStatus) {
        self.status = status;
        if status != ResourceStatus::Error {
            self.error = None;
        }
    }

    /// Marks the resource as failed.
    pub fn set_error(&mut self, error: AtomicError) {
        self.status = ResourceStatus::Error;
        self.error = Some(error);
    }

    pub fn get_error(&self) -> Option<&AtomicError> {
        self.error.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.status == ResourceStatus::Ready
    }

    pub fn is_new(&self) -> bool {
        self.status == ResourceStatus::New
    }

    pub fn is_loading(&self) -> bool {
        self.status == ResourceStatus::Loading
    }

    pub fn get_commit_builder(&self) -> &CommitBuilder {
        &self.commit_builder
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.commit_builder.has_unsaved_changes()
    }

    /// Signatures of commits already applied to this resource.
    pub fn applied_commit_signatures(&self) -> &HashSet<String> {
        &self.applied_commit_signatures
    }

    pub(crate) fn has_applied(&self, signature: &str) -> bool {
        self.applied_commit_signatures.contains(signature)
    }

    pub(crate) fn mark_applied(&mut self, signature: impl Into<String>) {
        self.applied_commit_signatures.insert(signature.into());
    }

    /// Signs the pending changes, posts them to `<origin>/commit` and, on
    /// success, stores the resource and starts a fresh commit builder.
    ///
    /// Uses `agent` if given, otherwise the store's agent. A failed post
    /// leaves the pending changes untouched so the save can be retried.
    pub async fn save(
        &mut self,
        store: &Store,
        agent: Option<&Agent>,
    ) -> Result<String, AtomicError> {
        let agent = resolve_agent(store, agent)?;
        if !self.commit_builder.has_unsaved_changes() {
            debug!(subject = %self.subject, "nothing to save");
            return Ok(self.subject.clone());
        }

        let commit = self.commit_builder.sign(&agent, now_millis())?;
        let endpoint = commit_endpoint(&self.subject)?;
        let accepted = store.post_commit(&commit, &endpoint).await?;

        self.mark_applied(commit.signature());
        if let Some(id) = accepted.id() {
            self.set_unsafe(urls::LAST_COMMIT, Value::from(id));
        }
        self.commit_builder = CommitBuilder::new(self.subject.clone());
        self.set_status(ResourceStatus::Ready);
        store.add_resource(self.clone());
        Ok(self.subject.clone())
    }

    /// Signs and posts a destroy commit, then drops the resource from the store.
    pub async fn destroy(&self, store: &Store, agent: Option<&Agent>) -> Result<(), AtomicError> {
        let agent = resolve_agent(store, agent)?;
        let mut builder = CommitBuilder::new(self.subject.clone());
        builder.set_destroy(true);
        let commit = builder.sign(&agent, now_millis())?;
        let endpoint = commit_endpoint(&self.subject)?;
        store.post_commit(&commit, &endpoint).await?;
        store.remove_resource(&self.subject);
        Ok(())
    }

    /// Walks the `parent` chain looking for a `write` list containing `agent`.
    ///
    /// Only a hint for the UI. The server enforces the actual rights.
    /// A parent that fails to load ends the walk with `false`.
    pub async fn can_write(&self, store: &Store, agent: &str) -> Result<bool, AtomicError> {
        let mut visited = HashSet::new();
        visited.insert(self.subject.clone());
        let mut current = self.clone();
        loop {
            if let Some(writers) = current.get(urls::WRITE) {
                let listed = writers
                    .to_sub_resources()?
                    .iter()
                    .any(|w| matches!(w, SubResource::Subject(s) if s == agent));
                if listed {
                    return Ok(true);
                }
            }
            let Some(parent) = current.get(urls::PARENT) else {
                return Ok(false);
            };
            let parent = parent.as_str()?.to_string();
            if !visited.insert(parent.clone()) {
                debug!(%parent, "parent cycle while checking write rights");
                return Ok(false);
            }
            current = store.get_resource_async(&parent).await;
            if let Some(error) = current.get_error() {
                debug!(%parent, %error, "unreadable parent while checking write rights");
                return Ok(false);
            }
        }
    }

    /// Serializes the resource to a JSON-AD object.
    pub fn to_json_ad(&self) -> Json {
        let mut map = Map::new();
        if self.subject != UNKNOWN_SUBJECT {
            map.insert("@id".into(), Json::String(self.subject.clone()));
        }
        for (property, value) in &self.propvals {
            map.insert(property.clone(), value.to_native());
        }
        Json::Object(map)
    }
}

fn resolve_agent(store: &Store, agent: Option<&Agent>) -> Result<Agent, AtomicError> {
    match agent {
        Some(agent) => Ok(agent.clone()),
        None => store.get_agent().ok_or(AtomicError::AgentMissing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_resources_start_loading_or_new() {
        let fetched = Resource::new("https://example.com/a");
        assert!(fetched.is_loading());
        assert!(!fetched.is_ready());

        let local = Resource::new_unsaved("https://example.com/b");
        assert!(local.is_new());
        assert_eq!(local.get_commit_builder().subject(), "https://example.com/b");
    }

    #[test]
    fn get_missing_property_is_none() {
        let r = Resource::new("https://example.com/a");
        assert!(r.get(urls::NAME).is_none());
    }

    #[test]
    fn set_unsafe_does_not_record_changes() {
        let mut r = Resource::new("https://example.com/a");
        r.set_unsafe(urls::NAME, Value::from("trusted"));
        assert_eq!(r.get(urls::NAME), Some(&Value::from("trusted")));
        assert!(!r.has_unsaved_changes());
    }

    #[test]
    fn remove_prop_val_records_removal() {
        let mut r = Resource::new("https://example.com/a");
        r.set_unsafe(urls::NAME, Value::from("x"));
        r.remove_prop_val(urls::NAME);
        assert!(r.get(urls::NAME).is_none());
        assert_eq!(r.get_commit_builder().get_remove(), [urls::NAME.to_string()]);

        // Removing something that was never set is tolerated.
        r.remove_prop_val(urls::DESCRIPTION);
        assert_eq!(r.get_commit_builder().get_remove().len(), 2);
    }

    #[test]
    fn status_transitions() {
        let mut r = Resource::new("https://example.com/a");
        r.set_error(AtomicError::NotFound("gone".into()));
        assert_eq!(r.get_status(), ResourceStatus::Error);
        assert_eq!(r.get_error(), Some(&AtomicError::NotFound("gone".into())));

        r.set_status(ResourceStatus::Ready);
        assert!(r.is_ready());
        assert!(r.get_error().is_none());
    }

    #[test]
    fn set_subject_updates_commit_builder() {
        let mut r = Resource::new_unsaved("https://example.com/old");
        r.set_subject("https://example.com/new");
        assert_eq!(r.get_subject(), "https://example.com/new");
        assert_eq!(r.get_commit_builder().subject(), "https://example.com/new");
    }

    #[test]
    fn json_ad_output() {
        let mut r = Resource::new("https://example.com/a");
        r.set_unsafe(urls::NAME, Value::from("A"));
        r.set_unsafe(urls::IS_A, Value::from(vec![urls::AGENT.to_string()]));
        assert_eq!(
            r.to_json_ad(),
            json!({
                "@id": "https://example.com/a",
                (urls::NAME): "A",
                (urls::IS_A): [urls::AGENT],
            })
        );
        assert_eq!(r.get_classes(), vec![urls::AGENT.to_string()]);

        let anonymous = Resource::new(UNKNOWN_SUBJECT);
        assert_eq!(anonymous.to_json_ad(), json!({}));
    }
}
