//! HTTP seam between the [`Store`](crate::Store) and a server.
//!
//! The store only talks to servers through [`HttpClient`]. `atomic-net`
//! provides the reqwest implementation; [`MemoryServer`] serves resources
//! from memory and accepts commits, for tests and offline use.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value as Json};
use tracing::{debug, instrument};
use url::Url;

use crate::commit::Commit;
use crate::error::AtomicError;
use crate::urls;

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        HttpResponse {
            status,
            body: body.into(),
        }
    }

    /// Maps the status to an error. Any 2xx is success.
    pub fn into_body(self, url: &str) -> Result<String, AtomicError> {
        if (200..300).contains(&self.status) {
            return Ok(self.body);
        }
        let message = if self.body.is_empty() {
            url.to_string()
        } else {
            format!("{url}: {}", self.body)
        };
        Err(match self.status {
            401 => AtomicError::Unauthorized(message),
            404 => AtomicError::NotFound(message),
            status => AtomicError::Server { status, message },
        })
    }
}

/// Minimal HTTP client. Transport failures map to [`AtomicError::Network`].
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str, headers: &[(String, String)])
    -> Result<HttpResponse, AtomicError>;

    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: String,
    ) -> Result<HttpResponse, AtomicError>;
}

/// GETs `url` as JSON-AD and decodes the body.
#[instrument(skip(client, headers))]
pub(crate) async fn fetch_json_ad(
    client: &dyn HttpClient,
    url: &str,
    mut headers: Vec<(String, String)>,
) -> Result<Json, AtomicError> {
    headers.push(("Accept".into(), urls::JSON_AD_MIME.into()));
    let body = client.get(url, &headers).await?.into_body(url)?;
    serde_json::from_str(&body).map_err(|e| AtomicError::Parse(format!("{url}: {e}")))
}

/// POSTs a signed commit and returns the commit as accepted by the server.
///
/// Servers answer with the stored commit, which carries its `@id`. An
/// empty or unrecognised body falls back to the commit that was sent.
#[instrument(skip(client, commit), fields(subject = %commit.subject()))]
pub(crate) async fn post_commit(
    client: &dyn HttpClient,
    endpoint: &str,
    commit: &Commit,
) -> Result<Commit, AtomicError> {
    let headers = vec![
        ("Content-Type".to_string(), urls::JSON_AD_MIME.to_string()),
        ("Accept".to_string(), urls::JSON_AD_MIME.to_string()),
    ];
    let body = client
        .post(endpoint, &headers, commit.to_json_ad())
        .await?
        .into_body(endpoint)?;
    match Commit::from_json_ad(&body) {
        Ok(accepted) => Ok(accepted),
        Err(e) => {
            debug!(error = %e, "commit response is not a commit");
            Ok(commit.clone())
        }
    }
}

/// `<origin>/commit` for the server hosting `subject`.
pub fn commit_endpoint(subject: &str) -> Result<String, AtomicError> {
    let url = Url::parse(subject)
        .map_err(|e| AtomicError::validation(format!("{subject:?} is not a URL: {e}")))?;
    Ok(format!("{}/commit", url.origin().ascii_serialization()))
}

/// `<server>/<segment>`, keeping any path prefix of `server`. Query and
/// fragment are dropped.
pub(crate) fn server_endpoint(server: &str, segment: &str) -> Result<Url, AtomicError> {
    let mut url = Url::parse(server)
        .map_err(|e| AtomicError::validation(format!("{server:?} is not a URL: {e}")))?;
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| AtomicError::validation(format!("{server:?} cannot have a path")))?
        .pop_if_empty()
        .push(segment);
    Ok(url)
}

/// `<server>/path?path=<subject>`, for fetching through the server as a proxy.
pub fn proxy_url(server: &str, subject: &str) -> Result<String, AtomicError> {
    let mut url = server_endpoint(server, "path")?;
    url.query_pairs_mut().append_pair("path", subject);
    Ok(url.into())
}

/// A request seen by a [`MemoryServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// In-memory server holding JSON-AD resources keyed by URL.
///
/// GET serves a stored resource, unwrapping `/path?path=` proxy requests.
/// POST to any `/commit` endpoint decodes the commit, applies it to the
/// stored copy and echoes it back with an `@id`.
#[derive(Debug, Default)]
pub struct MemoryServer {
    resources: RwLock<HashMap<String, Json>>,
    failures: RwLock<HashMap<String, HttpResponse>>,
    commits: RwLock<Vec<Commit>>,
    requests: RwLock<Vec<RecordedRequest>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `resource` under `subject`, adding `@id` if it is missing.
    pub fn insert(&self, subject: impl Into<String>, mut resource: Json) {
        let subject = subject.into();
        if let Json::Object(map) = &mut resource {
            map.entry("@id")
                .or_insert_with(|| Json::String(subject.clone()));
        }
        self.resources.write().insert(subject, resource);
    }

    pub fn resource(&self, subject: &str) -> Option<Json> {
        self.resources.read().get(subject).cloned()
    }

    pub fn remove(&self, subject: &str) -> Option<Json> {
        self.resources.write().remove(subject)
    }

    /// Makes every request to `url` answer with `status` and `body`.
    pub fn fail(&self, url: impl Into<String>, status: u16, body: impl Into<String>) {
        self.failures
            .write()
            .insert(url.into(), HttpResponse::new(status, body));
    }

    pub fn clear_failure(&self, url: &str) {
        self.failures.write().remove(url);
    }

    /// Commits accepted so far, in order.
    pub fn commits(&self) -> Vec<Commit> {
        self.commits.read().clone()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.read().clone()
    }

    /// Number of GET requests made for `url`.
    pub fn get_count(&self, url: &str) -> usize {
        self.requests
            .read()
            .iter()
            .filter(|r| r.method == "GET" && r.url == url)
            .count()
    }

    fn record(&self, method: &'static str, url: &str, headers: &[(String, String)]) {
        self.requests.write().push(RecordedRequest {
            method,
            url: url.to_string(),
            headers: headers.to_vec(),
        });
    }

    fn apply(&self, commit: &Commit) {
        let mut resources = self.resources.write();
        if commit.destroy() {
            resources.remove(commit.subject());
            return;
        }
        let entry = resources
            .entry(commit.subject().to_string())
            .or_insert_with(|| {
                let mut map = Map::new();
                map.insert("@id".into(), Json::String(commit.subject().to_string()));
                Json::Object(map)
            });
        if let Json::Object(map) = entry {
            for (property, value) in commit.set() {
                map.insert(property.clone(), value.clone());
            }
            for property in commit.remove() {
                map.remove(property);
            }
        }
    }
}

/// Resolves `/path?path=<subject>` to `<subject>`.
fn unwrap_proxy(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if !parsed.path().ends_with("/path") {
        return None;
    }
    parsed
        .query_pairs()
        .find(|(key, _)| key == "path")
        .map(|(_, value)| value.into_owned())
}

#[async_trait]
impl HttpClient for MemoryServer {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, AtomicError> {
        self.record("GET", url, headers);
        if let Some(failure) = self.failures.read().get(url) {
            return Ok(failure.clone());
        }
        let subject = unwrap_proxy(url).unwrap_or_else(|| url.to_string());
        Ok(match self.resource(&subject) {
            Some(resource) => HttpResponse::new(200, resource.to_string()),
            None => HttpResponse::new(404, "resource not found"),
        })
    }

    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: String,
    ) -> Result<HttpResponse, AtomicError> {
        self.record("POST", url, headers);
        if let Some(failure) = self.failures.read().get(url) {
            return Ok(failure.clone());
        }
        if !url.ends_with("/commit") {
            return Ok(HttpResponse::new(404, "no such endpoint"));
        }
        let commit = match Commit::from_json_ad(&body) {
            Ok(commit) => commit,
            Err(e) => return Ok(HttpResponse::new(400, e.to_string())),
        };
        let id = format!(
            "{}s/{}",
            url,
            commit.signature().replace(['/', '+', '='], "")
        );
        let accepted = commit.with_id(id);
        self.apply(&accepted);
        let response = accepted.to_json_ad();
        self.commits.write().push(accepted);
        Ok(HttpResponse::new(200, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::test_agent;
    use crate::commit::CommitBuilder;
    use serde_json::json;

    #[test]
    fn status_mapping() {
        assert_eq!(HttpResponse::new(200, "ok").into_body("u").unwrap(), "ok");
        assert_eq!(HttpResponse::new(201, "").into_body("u").unwrap(), "");
        assert!(matches!(
            HttpResponse::new(401, "").into_body("u"),
            Err(AtomicError::Unauthorized(_))
        ));
        assert!(matches!(
            HttpResponse::new(404, "").into_body("u"),
            Err(AtomicError::NotFound(_))
        ));
        assert_eq!(
            HttpResponse::new(500, "boom").into_body("https://x"),
            Err(AtomicError::Server {
                status: 500,
                message: "https://x: boom".into()
            })
        );
    }

    #[test]
    fn endpoints() {
        assert_eq!(
            commit_endpoint("https://example.com:8080/things/1?x=y").unwrap(),
            "https://example.com:8080/commit"
        );
        assert!(commit_endpoint("not a url").is_err());
        assert_eq!(
            proxy_url("https://server.dev", "https://other.dev/a b").unwrap(),
            "https://server.dev/path?path=https%3A%2F%2Fother.dev%2Fa+b"
        );
        assert_eq!(
            proxy_url("https://server.dev/atomic/?x=1", "https://other.dev/a").unwrap(),
            "https://server.dev/atomic/path?path=https%3A%2F%2Fother.dev%2Fa"
        );
        assert_eq!(
            server_endpoint("https://server.dev/atomic", "collections").unwrap().as_str(),
            "https://server.dev/atomic/collections"
        );
        assert!(server_endpoint("mailto:someone@example.com", "path").is_err());
        assert_eq!(
            unwrap_proxy("https://server.dev/path?path=https%3A%2F%2Fother.dev%2Fa").as_deref(),
            Some("https://other.dev/a")
        );
    }

    #[tokio::test]
    async fn memory_server_serves_and_records() {
        let server = MemoryServer::new();
        server.insert("https://example.com/a", json!({ (urls::NAME): "A" }));

        let body = fetch_json_ad(&server, "https://example.com/a", vec![])
            .await
            .unwrap();
        assert_eq!(body["@id"], "https://example.com/a");
        assert_eq!(server.get_count("https://example.com/a"), 1);
        assert!(
            server.requests()[0]
                .headers
                .contains(&("Accept".to_string(), urls::JSON_AD_MIME.to_string()))
        );

        let missing = fetch_json_ad(&server, "https://example.com/b", vec![]).await;
        assert!(matches!(missing, Err(AtomicError::NotFound(_))));

        server.fail("https://example.com/a", 401, "nope");
        let denied = fetch_json_ad(&server, "https://example.com/a", vec![]).await;
        assert!(matches!(denied, Err(AtomicError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn memory_server_applies_commits() {
        let server = MemoryServer::new();
        let mut builder = CommitBuilder::new("https://example.com/new");
        builder.set(urls::NAME, json!("fresh"));
        let commit = builder.sign(&test_agent(), 1).unwrap();

        let accepted = post_commit(&server, "https://example.com/commit", &commit)
            .await
            .unwrap();
        assert!(accepted.id().is_some());
        assert_eq!(accepted.signature(), commit.signature());
        assert_eq!(server.resource("https://example.com/new").unwrap()[urls::NAME], "fresh");

        let mut destroy = CommitBuilder::new("https://example.com/new");
        destroy.set_destroy(true);
        let commit = destroy.sign(&test_agent(), 2).unwrap();
        post_commit(&server, "https://example.com/commit", &commit)
            .await
            .unwrap();
        assert!(server.resource("https://example.com/new").is_none());
        assert_eq!(server.commits().len(), 2);
    }
}
