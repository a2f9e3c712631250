//! The client-side cache of resources.
//!
//! A [`Store`] is a cheap, cloneable handle. It owns the resource cache, the
//! current agent, the server URL, the subscriber registry and the push
//! channel. Every resource has at most one cached copy per subject;
//! [`Store::add_resource`] replaces it and notifies subscribers.
//!
//! Locks are never held across an `.await` or while a subscriber runs, so
//! a callback may call back into the store.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::Value as Json;
use tokio::sync::mpsc;
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::agent::Agent;
use crate::client::{self, HttpClient};
use crate::commit::{Commit, now_millis};
use crate::config::StoreConfig;
use crate::error::AtomicError;
use crate::parse::{parse_json_ad_array, parse_json_ad_resource, parse_property_value};
use crate::property::Property;
use crate::resource::{Resource, ResourceStatus, UNKNOWN_SUBJECT};
use crate::sync::{PushChannel, PushConnector, PushFrame, push_channel_url};
use crate::urls;

/// Called with the new state every time a subscribed resource changes.
pub type SubscriberCallback = Arc<dyn Fn(&Resource) + Send + Sync>;

/// Receives errors that have no caller to return to, such as failures
/// while applying a pushed commit.
pub type ErrorHandler = Arc<dyn Fn(&AtomicError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Options for [`Store::fetch_resource`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Fetch even if a ready copy is cached.
    pub force_refresh: bool,
    /// Fetch through the current server's `/path` endpoint.
    pub from_proxy: bool,
}

struct Subscriber {
    id: SubscriberId,
    callback: SubscriberCallback,
}

struct StoreInner {
    resources: RwLock<HashMap<String, Resource>>,
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    agent: RwLock<Option<Agent>>,
    server_url: RwLock<String>,
    client: Arc<dyn HttpClient>,
    connector: RwLock<Option<Arc<dyn PushConnector>>>,
    channel: Mutex<Option<PushChannel>>,
    error_handler: RwLock<ErrorHandler>,
    next_subscriber: AtomicU64,
    push_enabled: AtomicBool,
    verify_remote_commits: AtomicBool,
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

/// Non-owning handle, used by background tasks.
#[derive(Clone)]
pub(crate) struct WeakStore(Weak<StoreInner>);

impl WeakStore {
    pub(crate) fn upgrade(&self) -> Option<Store> {
        self.0.upgrade().map(|inner| Store { inner })
    }
}

fn default_error_handler() -> ErrorHandler {
    Arc::new(|error: &AtomicError| error!(%error, "unhandled store error"))
}

fn normalize_server_url(server_url: &str) -> Result<String, AtomicError> {
    Url::parse(server_url)
        .map_err(|e| AtomicError::validation(format!("{server_url:?} is not a URL: {e}")))?;
    Ok(server_url.trim_end_matches('/').to_string())
}

impl Store {
    /// Creates a store for `server_url` that talks HTTP through `client`.
    pub fn new(server_url: &str, client: Arc<dyn HttpClient>) -> Result<Self, AtomicError> {
        Ok(Store {
            inner: Arc::new(StoreInner {
                resources: RwLock::new(HashMap::new()),
                subscribers: RwLock::new(HashMap::new()),
                agent: RwLock::new(None),
                server_url: RwLock::new(normalize_server_url(server_url)?),
                client,
                connector: RwLock::new(None),
                channel: Mutex::new(None),
                error_handler: RwLock::new(default_error_handler()),
                next_subscriber: AtomicU64::new(0),
                push_enabled: AtomicBool::new(true),
                verify_remote_commits: AtomicBool::new(true),
            }),
        })
    }

    /// Creates a store from loaded configuration.
    pub fn from_config(
        config: &StoreConfig,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self, AtomicError> {
        let store = Store::new(&config.server_url, client)?;
        store.set_agent(config.agent()?);
        store
            .inner
            .push_enabled
            .store(config.push_channel, Ordering::Relaxed);
        store.set_verify_remote_commits(config.verify_remote_commits);
        Ok(store)
    }

    pub(crate) fn downgrade(&self) -> WeakStore {
        WeakStore(Arc::downgrade(&self.inner))
    }

    pub fn get_server_url(&self) -> String {
        self.inner.server_url.read().clone()
    }

    /// Switches to another server and reopens the push channel there.
    ///
    /// Current subscriptions are announced on the new channel.
    pub async fn set_server_url(&self, server_url: &str) -> Result<(), AtomicError> {
        let server_url = normalize_server_url(server_url)?;
        *self.inner.server_url.write() = server_url;
        self.reconnect_push().await;
        Ok(())
    }

    /// Installs the transport for the push channel and opens it.
    pub async fn set_push_connector(&self, connector: Arc<dyn PushConnector>) {
        *self.inner.connector.write() = Some(connector);
        self.reconnect_push().await;
    }

    /// Whether pushed commits are checked against their signer's public key.
    pub fn set_verify_remote_commits(&self, verify: bool) {
        self.inner
            .verify_remote_commits
            .store(verify, Ordering::Relaxed);
    }

    pub fn get_agent(&self) -> Option<Agent> {
        self.inner.agent.read().clone()
    }

    pub fn set_agent(&self, agent: Option<Agent>) {
        *self.inner.agent.write() = agent;
    }

    pub fn set_error_handler(&self, handler: impl Fn(&AtomicError) + Send + Sync + 'static) {
        *self.inner.error_handler.write() = Arc::new(handler);
    }

    pub fn handle_error(&self, error: &AtomicError) {
        let handler = self.inner.error_handler.read().clone();
        handler(error);
    }

    /// Inserts or replaces the cached copy, then notifies subscribers.
    pub fn add_resource(&self, resource: Resource) {
        self.inner
            .resources
            .write()
            .insert(resource.get_subject().to_string(), resource.clone());
        self.notify(&resource);
    }

    /// Adds every resource in a JSON-AD array, for seeding the cache.
    pub fn populate(&self, json: &Json) -> Result<usize, AtomicError> {
        let resources = parse_json_ad_array(json, Some(self))?;
        if let Some(anonymous) = resources.iter().find(|r| r.get_subject() == UNKNOWN_SUBJECT) {
            return Err(AtomicError::Parse(format!(
                "cannot cache a resource without @id: {}",
                anonymous.to_json_ad()
            )));
        }
        let count = resources.len();
        for resource in resources {
            self.add_resource(resource);
        }
        Ok(count)
    }

    /// Drops the cached copy, without notifying anyone.
    pub fn remove_resource(&self, subject: &str) -> Option<Resource> {
        self.inner.resources.write().remove(subject)
    }

    pub fn get_all_subjects(&self) -> Vec<String> {
        self.inner.resources.read().keys().cloned().collect()
    }

    fn cached(&self, subject: &str) -> Option<Resource> {
        self.inner.resources.read().get(subject).cloned()
    }

    fn notify(&self, resource: &Resource) {
        let callbacks: Vec<SubscriberCallback> = self
            .inner
            .subscribers
            .read()
            .get(resource.get_subject())
            .map(|subs| subs.iter().map(|s| s.callback.clone()).collect())
            .unwrap_or_default();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(resource))).is_err() {
                self.handle_error(&AtomicError::Notification(
                    resource.get_subject().to_string(),
                ));
            }
        }
    }

    /// Returns the cached resource right away, never waiting on the network.
    ///
    /// A miss caches a placeholder and starts a fetch in the background, or
    /// with `is_new` caches an unsaved resource instead. Subscribe to hear
    /// when the fetch completes. Empty and placeholder subjects give a new
    /// resource that is not cached.
    pub fn get_resource_loading(&self, subject: &str, is_new: bool) -> Resource {
        if subject.is_empty() || subject == UNKNOWN_SUBJECT {
            return Resource::new_unsaved(UNKNOWN_SUBJECT);
        }
        if let Some(found) = self.cached(subject) {
            return found;
        }

        if is_new {
            let resource = Resource::new_unsaved(subject);
            self.inner
                .resources
                .write()
                .insert(subject.to_string(), resource.clone());
            return resource;
        }

        let placeholder = Resource::new(subject);
        self.inner
            .resources
            .write()
            .insert(subject.to_string(), placeholder.clone());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = self.clone();
                let subject = subject.to_string();
                handle.spawn(async move {
                    store.fetch_resource(&subject, FetchOptions::default()).await;
                });
            }
            Err(_) => warn!(%subject, "no async runtime, resource will not be fetched"),
        }
        placeholder
    }

    /// Returns the cached resource if it is ready or new, fetching otherwise.
    ///
    /// Never fails: fetch errors are captured on the returned resource.
    pub async fn get_resource_async(&self, subject: &str) -> Resource {
        if let Some(found) = self.cached(subject)
            && matches!(found.get_status(), ResourceStatus::Ready | ResourceStatus::New)
        {
            return found;
        }
        self.fetch_resource(subject, FetchOptions::default()).await
    }

    /// Fetches and parses a resource, stores the result and returns it.
    ///
    /// Failures are recorded on the resource, which is stored in the error
    /// state. Requests are signed when the agent has a subject.
    #[instrument(skip(self))]
    pub async fn fetch_resource(&self, subject: &str, options: FetchOptions) -> Resource {
        if !options.force_refresh
            && let Some(found) = self.cached(subject)
            && found.is_ready()
        {
            return found;
        }

        let mut resource = Resource::new(subject);
        match self.fetch_into(subject, options, &mut resource).await {
            Ok(()) => self.add_resource(resource.clone()),
            // The parser already stored the resource in its error state.
            Err(_) if resource.get_status() == ResourceStatus::Error => {}
            Err(error) => {
                debug!(%error, "fetch failed");
                resource.set_error(error);
                self.add_resource(resource.clone());
            }
        }
        resource
    }

    async fn fetch_into(
        &self,
        subject: &str,
        options: FetchOptions,
        resource: &mut Resource,
    ) -> Result<(), AtomicError> {
        let url = if options.from_proxy {
            client::proxy_url(&self.get_server_url(), subject)?
        } else {
            subject.to_string()
        };
        let headers = match self.get_agent() {
            Some(agent) if agent.subject().is_some() => agent.signed_headers(subject, now_millis())?,
            _ => Vec::new(),
        };
        let json = client::fetch_json_ad(self.inner.client.as_ref(), &url, headers).await?;
        parse_json_ad_resource(&json, resource, Some(self))
    }

    /// Resolves a property definition, fetching it if needed.
    pub async fn get_property(&self, subject: &str) -> Result<Property, AtomicError> {
        let resource = self.get_resource_async(subject).await;
        Property::from_resource(&resource)
    }

    /// Posts an already signed commit and returns the server's copy of it.
    pub async fn post_commit(&self, commit: &Commit, endpoint: &str) -> Result<Commit, AtomicError> {
        client::post_commit(self.inner.client.as_ref(), endpoint, commit).await
    }

    /// Registers `callback` for changes to `subject`.
    ///
    /// The first subscription for a subject is announced on the push channel.
    /// Dropping the returned [`Subscription`] unsubscribes.
    pub fn subscribe(
        &self,
        subject: &str,
        callback: impl Fn(&Resource) + Send + Sync + 'static,
    ) -> Subscription {
        let id = SubscriberId(self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed));
        let first = {
            let mut subscribers = self.inner.subscribers.write();
            let entry = subscribers.entry(subject.to_string()).or_default();
            entry.push(Subscriber {
                id,
                callback: Arc::new(callback),
            });
            entry.len() == 1
        };
        if first {
            self.send_frame(PushFrame::Subscribe(subject.to_string()));
        }
        Subscription {
            store: Arc::downgrade(&self.inner),
            subject: subject.to_string(),
            id,
        }
    }

    /// Removes one callback. The last one for a subject is announced.
    pub fn unsubscribe(&self, subject: &str, id: SubscriberId) {
        let last = {
            let mut subscribers = self.inner.subscribers.write();
            let Some(entry) = subscribers.get_mut(subject) else {
                return;
            };
            let before = entry.len();
            entry.retain(|s| s.id != id);
            if entry.len() == before {
                return;
            }
            let empty = entry.is_empty();
            if empty {
                subscribers.remove(subject);
            }
            empty
        };
        if last {
            self.send_frame(PushFrame::Unsubscribe(subject.to_string()));
        }
    }

    /// Number of callbacks registered for `subject`.
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.inner
            .subscribers
            .read()
            .get(subject)
            .map_or(0, Vec::len)
    }

    /// Waits for the next change to `subject`. Register before triggering it.
    pub fn wait_for_update(&self, subject: &str) -> UpdateWaiter {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(subject, move |resource| {
            let _ = tx.send(resource.clone());
        });
        UpdateWaiter {
            rx,
            _subscription: subscription,
        }
    }

    /// Moves a cached resource to a new subject, if that subject is free.
    pub async fn rename_subject(&self, old: &str, new: &str) -> Result<(), AtomicError> {
        Url::parse(new)
            .map_err(|e| AtomicError::validation(format!("{new:?} is not a URL: {e}")))?;
        if self.check_subject_taken(new).await {
            return Err(AtomicError::validation(format!("{new} is already taken")));
        }
        let mut resources = self.inner.resources.write();
        let mut resource = resources
            .remove(old)
            .ok_or_else(|| AtomicError::NotFound(old.to_string()))?;
        resource.set_subject(new);
        resources.insert(new.to_string(), resource);
        Ok(())
    }

    /// True if `subject` is cached as ready or exists on its server.
    pub async fn check_subject_taken(&self, subject: &str) -> bool {
        if self.cached(subject).is_some_and(|r| r.is_ready()) {
            return true;
        }
        match self.inner.client.get(subject, &[]).await {
            Ok(response) => (200..300).contains(&response.status),
            Err(error) => {
                debug!(%error, %subject, "could not check subject");
                false
            }
        }
    }

    /// A fresh random subject under `parent`, or under the server URL.
    pub fn create_subject(&self, parent: Option<&str>) -> String {
        let base = parent
            .map(|p| p.trim_end_matches('/').to_string())
            .unwrap_or_else(|| self.get_server_url());
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        format!("{base}/{id}")
    }

    /// Applies a serialized commit received from the push channel.
    ///
    /// A commit whose signature the resource has already seen is skipped,
    /// which makes the echo of a local save a no-op. A commit for a subject
    /// that is not cached creates the resource from the commit's values.
    #[instrument(skip_all)]
    pub async fn apply_commit(&self, serialized: &str) -> Result<(), AtomicError> {
        let commit = Commit::from_json_ad(serialized)?;
        let subject = commit.subject().to_string();

        if let Some(r) = self.cached(&subject)
            && r.has_applied(commit.signature())
        {
            debug!(%subject, "commit already applied");
            return Ok(());
        }

        if self.inner.verify_remote_commits.load(Ordering::Relaxed) {
            self.verify_commit(&commit).await?;
        }

        // Re-read: the resource may have changed while verifying.
        let mut resource = match self.cached(&subject) {
            Some(r) if r.has_applied(commit.signature()) => return Ok(()),
            Some(r) => r,
            None if commit.destroy() => {
                debug!(%subject, "destroy commit for uncached resource");
                return Ok(());
            }
            None => {
                debug!(%subject, "creating resource from commit");
                Resource::new(subject.clone())
            }
        };

        if commit.destroy() {
            debug!(%subject, "destroyed by remote commit");
            self.remove_resource(&subject);
            return Ok(());
        }

        for (property, value) in commit.set() {
            let value = parse_property_value(value, Some(self)).map_err(|e| {
                AtomicError::Parse(format!("commit for {subject} sets {property}: {e}"))
            })?;
            resource.set_unsafe(property.clone(), value);
        }
        for property in commit.remove() {
            resource.remove_unsafe(property);
        }
        if let Some(id) = commit.id() {
            resource.set_unsafe(urls::LAST_COMMIT, id.into());
        }
        resource.mark_applied(commit.signature());
        if resource.is_loading() {
            resource.set_status(ResourceStatus::Ready);
        }
        self.add_resource(resource);
        Ok(())
    }

    async fn verify_commit(&self, commit: &Commit) -> Result<(), AtomicError> {
        if let Some(agent) = self.get_agent()
            && agent.subject() == Some(commit.signer())
        {
            return commit.verify(agent.public_key());
        }
        let signer = self.get_resource_async(commit.signer()).await;
        if let Some(error) = signer.get_error() {
            return Err(AtomicError::InvalidSignature(format!(
                "cannot load signer {}: {error}",
                commit.signer()
            )));
        }
        let public_key = signer.get(urls::PUBLIC_KEY).ok_or_else(|| {
            AtomicError::InvalidSignature(format!("signer {} has no public key", commit.signer()))
        })?;
        commit.verify(public_key.as_str()?)
    }

    fn send_frame(&self, frame: PushFrame) {
        if let Some(channel) = self.inner.channel.lock().as_ref() {
            channel.send(frame);
        }
    }

    /// Closes the current push channel and opens one for the current server.
    #[instrument(skip(self))]
    async fn reconnect_push(&self) {
        self.inner.channel.lock().take();
        if !self.inner.push_enabled.load(Ordering::Relaxed) {
            return;
        }
        let Some(connector) = self.inner.connector.read().clone() else {
            return;
        };
        let url = match push_channel_url(&self.get_server_url()) {
            Ok(url) => url,
            Err(error) => {
                warn!(%error, "cannot derive push channel url");
                return;
            }
        };
        let connection = match connector.connect(&url).await {
            Ok(connection) => connection,
            Err(error) => {
                warn!(%error, %url, "push channel unavailable");
                return;
            }
        };
        let channel = PushChannel::start(self.downgrade(), connection);
        let subjects: Vec<String> = self.inner.subscribers.read().keys().cloned().collect();
        for subject in subjects {
            channel.send(PushFrame::Subscribe(subject));
        }
        debug!(%url, "push channel open");
        *self.inner.channel.lock() = Some(channel);
    }

    /// Forgets every cached resource and subscriber.
    pub fn clear(&self) {
        self.inner.subscribers.write().clear();
        self.inner.resources.write().clear();
    }

    /// Closes the push channel, then clears the store.
    pub fn shutdown(&self) {
        self.inner.channel.lock().take();
        self.clear();
    }
}

/// Handle to a registered subscriber callback.
///
/// Dropping it unsubscribes. Use [`Subscription::detach`] to keep the
/// callback for the lifetime of the store.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    store: Weak<StoreInner>,
    subject: String,
    id: SubscriberId,
}

impl Subscription {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Removes the callback now. Same as dropping the handle.
    pub fn unsubscribe(self) {}

    /// Keeps the callback registered after this handle is gone.
    pub fn detach(mut self) {
        self.store = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            Store { inner }.unsubscribe(&self.subject, self.id);
        }
    }
}

/// Receives the updates of one subject, see [`Store::wait_for_update`].
pub struct UpdateWaiter {
    rx: mpsc::UnboundedReceiver<Resource>,
    _subscription: Subscription,
}

impl UpdateWaiter {
    /// The next state of the resource, or `None` once the store shut down.
    pub async fn recv(&mut self) -> Option<Resource> {
        self.rx.recv().await
    }
}
