//! Paginated cursor over a server-side query.
//!
//! A collection is not stored anywhere. It is defined by its
//! [`CollectionParams`], and each page is an ordinary resource at
//! `{server}/collections?...&current_page=N` that the [`Store`] fetches and
//! caches like any other.

use std::collections::{HashMap, HashSet};

use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use crate::client::server_endpoint;
use crate::error::AtomicError;
use crate::resource::Resource;
use crate::store::{FetchOptions, Store};
use crate::urls;

pub const DEFAULT_PAGE_SIZE: usize = 30;

/// The query a [`Collection`] runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionParams {
    /// Only members with this property.
    pub property: Option<String>,
    /// Only members whose `property` has this value.
    pub value: Option<String>,
    pub sort_by: Option<String>,
    pub sort_desc: bool,
    pub page_size: usize,
}

impl Default for CollectionParams {
    fn default() -> Self {
        CollectionParams {
            property: None,
            value: None,
            sort_by: None,
            sort_desc: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl CollectionParams {
    /// URL of page `page` (zero-based) of this query on `server`.
    pub fn page_url(&self, server: &str, page: usize) -> Result<String, AtomicError> {
        let mut url = server_endpoint(server, "collections")?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(property) = &self.property {
                query.append_pair("property", property);
            }
            if let Some(value) = &self.value {
                query.append_pair("value", value);
            }
            if let Some(sort_by) = &self.sort_by {
                query.append_pair("sort_by", sort_by);
            }
            if self.sort_desc {
                query.append_pair("sort_desc", "true");
            }
            query.append_pair("page_size", &self.page_size.to_string());
            query.append_pair("current_page", &page.to_string());
        }
        Ok(url.into())
    }
}

/// Lazily paged view over the members of a query.
///
/// Creating one starts fetching the first page in the background.
/// [`Collection::wait_for_ready`] resolves once its metadata is known.
pub struct Collection {
    store: Store,
    params: CollectionParams,
    pages: HashMap<usize, Vec<String>>,
    /// Pages dropped by `invalidate` that must bypass the store cache.
    stale: HashSet<usize>,
    total_members: Option<usize>,
    first_page: Option<JoinHandle<Resource>>,
}

impl Collection {
    /// Creates the collection and starts fetching page 0.
    ///
    /// Outside a tokio runtime nothing is fetched until the first call to
    /// [`Collection::wait_for_ready`].
    pub fn new(store: &Store, params: CollectionParams) -> Self {
        let mut collection = Collection {
            store: store.clone(),
            params,
            pages: HashMap::new(),
            stale: HashSet::new(),
            total_members: None,
            first_page: None,
        };
        collection.first_page = collection.spawn_first_page(FetchOptions::default());
        collection
    }

    fn spawn_first_page(&self, options: FetchOptions) -> Option<JoinHandle<Resource>> {
        let url = self.page_url(0).ok()?;
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let store = self.store.clone();
        Some(handle.spawn(async move { store.fetch_resource(&url, options).await }))
    }

    pub fn params(&self) -> &CollectionParams {
        &self.params
    }

    fn page_size(&self) -> usize {
        self.params.page_size.max(1)
    }

    pub fn page_url(&self, page: usize) -> Result<String, AtomicError> {
        self.params.page_url(&self.store.get_server_url(), page)
    }

    /// Total member count, once the first page has loaded.
    pub fn total_members(&self) -> Option<usize> {
        self.total_members
    }

    /// Number of pages, once the first page has loaded.
    pub fn total_pages(&self) -> Option<usize> {
        self.total_members.map(|total| total.div_ceil(self.page_size()))
    }

    /// Waits until the first page and the collection metadata are loaded.
    pub async fn wait_for_ready(&mut self) -> Result<(), AtomicError> {
        if self.total_members.is_some() {
            return Ok(());
        }
        let page = match self.first_page.take() {
            Some(handle) => handle
                .await
                .map_err(|e| AtomicError::Network(format!("collection fetch failed: {e}")))?,
            None => {
                let url = self.page_url(0)?;
                self.store.fetch_resource(&url, FetchOptions::default()).await
            }
        };
        self.load_page(0, &page)
    }

    pub async fn get_total_members(&mut self) -> Result<usize, AtomicError> {
        self.wait_for_ready().await?;
        Ok(self.total_members.unwrap_or_default())
    }

    /// Subject of the member at `index`, fetching its page if needed.
    #[instrument(skip(self))]
    pub async fn get_member_with_index(&mut self, index: usize) -> Result<String, AtomicError> {
        let total = self.get_total_members().await?;
        if index >= total {
            return Err(AtomicError::IndexOutOfBounds { index, total });
        }
        let page_size = self.page_size();
        let page = index / page_size;
        if !self.pages.contains_key(&page) {
            let url = self.page_url(page)?;
            let options = FetchOptions {
                force_refresh: self.stale.remove(&page),
                ..Default::default()
            };
            debug!(page, %url, "fetching collection page");
            let resource = self.store.fetch_resource(&url, options).await;
            self.load_page(page, &resource)?;
        }
        self.pages
            .get(&page)
            .and_then(|members| members.get(index % page_size))
            .cloned()
            .ok_or_else(|| {
                AtomicError::InvalidCollection(format!(
                    "page {page} has no member at {}",
                    index % page_size
                ))
            })
    }

    /// Every member, fetching all pages.
    pub async fn get_all_members(&mut self) -> Result<Vec<String>, AtomicError> {
        let total = self.get_total_members().await?;
        let mut members = Vec::with_capacity(total);
        for index in 0..total {
            members.push(self.get_member_with_index(index).await?);
        }
        Ok(members)
    }

    /// Drops all cached pages and refetches page 0.
    ///
    /// Resolves once the store has been updated with the fresh first page.
    /// Other pages are refetched from the network when next requested.
    pub async fn invalidate(&mut self) -> Result<(), AtomicError> {
        self.stale.extend(self.pages.keys().copied().filter(|page| *page != 0));
        self.pages.clear();
        self.total_members = None;
        if let Some(pending) = self.first_page.take() {
            pending.abort();
        }

        let mut update = self.store.wait_for_update(&self.page_url(0)?);
        let refetch = self.spawn_first_page(FetchOptions {
            force_refresh: true,
            ..Default::default()
        });
        let page = match refetch {
            Some(_) => update
                .recv()
                .await
                .ok_or_else(|| AtomicError::Network("store closed during refresh".into()))?,
            None => {
                return Err(AtomicError::Network(
                    "cannot refresh a collection outside a tokio runtime".into(),
                ));
            }
        };
        self.load_page(0, &page)
    }

    fn load_page(&mut self, page: usize, resource: &Resource) -> Result<(), AtomicError> {
        if let Some(error) = resource.get_error() {
            return Err(error.clone());
        }
        let subject = resource.get_subject();
        let total = resource
            .get(urls::COLLECTION_TOTAL_MEMBERS)
            .ok_or_else(|| AtomicError::InvalidCollection(format!("{subject} has no totalMembers")))?;
        let total = total
            .to_integer()
            .ok()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| {
                AtomicError::InvalidCollection(format!(
                    "totalMembers of {subject} is not a number: {total}"
                ))
            })?;
        let members = match resource.get(urls::COLLECTION_MEMBERS) {
            Some(members) => members.to_array().map_err(|e| {
                AtomicError::InvalidCollection(format!("members of {subject}: {e}"))
            })?,
            None => Vec::new(),
        };
        self.total_members = Some(total);
        self.pages.insert(page, members);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryServer;
    use serde_json::{Value as Json, json};
    use std::sync::Arc;
    use url::Url;

    #[test]
    fn page_url_carries_the_query() {
        let params = CollectionParams {
            property: Some(urls::IS_A.into()),
            value: Some(urls::AGENT.into()),
            sort_by: Some(urls::NAME.into()),
            sort_desc: true,
            page_size: 10,
        };
        let url = Url::parse(&params.page_url("https://example.com/", 3).unwrap()).unwrap();
        assert_eq!(url.path(), "/collections");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("property".to_string(), urls::IS_A.to_string()),
                ("value".to_string(), urls::AGENT.to_string()),
                ("sort_by".to_string(), urls::NAME.to_string()),
                ("sort_desc".to_string(), "true".to_string()),
                ("page_size".to_string(), "10".to_string()),
                ("current_page".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn page_url_keeps_the_server_path() {
        let params = CollectionParams::default();
        assert_eq!(
            params.page_url("https://host.dev/atomic", 0).unwrap(),
            "https://host.dev/atomic/collections?page_size=30&current_page=0"
        );
    }

    fn serve_page(server: &MemoryServer, params: &CollectionParams, page: usize, total: Json) {
        let members: Vec<String> = (0..params.page_size)
            .map(|i| format!("https://example.com/m{}", page * params.page_size + i))
            .collect();
        let url = params.page_url("https://example.com", page).unwrap();
        server.insert(
            url,
            json!({
                (urls::COLLECTION_TOTAL_MEMBERS): total,
                (urls::COLLECTION_MEMBERS): members,
            }),
        );
    }

    #[tokio::test]
    async fn non_numeric_total_is_invalid() {
        let server = Arc::new(MemoryServer::new());
        let params = CollectionParams::default();
        serve_page(&server, &params, 0, json!("many"));
        let store = Store::new("https://example.com", server).unwrap();

        let mut collection = Collection::new(&store, params);
        assert!(matches!(
            collection.wait_for_ready().await,
            Err(AtomicError::InvalidCollection(_))
        ));
    }

    #[tokio::test]
    async fn total_pages_rounds_up() {
        let server = Arc::new(MemoryServer::new());
        let params = CollectionParams::default();
        serve_page(&server, &params, 0, json!(61));
        let store = Store::new("https://example.com", server).unwrap();

        let mut collection = Collection::new(&store, params);
        assert_eq!(collection.total_pages(), None);
        collection.wait_for_ready().await.unwrap();
        assert_eq!(collection.total_members(), Some(61));
        assert_eq!(collection.total_pages(), Some(3));
    }

    #[tokio::test]
    async fn missing_collection_reports_not_found() {
        let server = Arc::new(MemoryServer::new());
        let store = Store::new("https://example.com", server).unwrap();
        let mut collection = Collection::new(&store, CollectionParams::default());
        assert!(matches!(
            collection.get_member_with_index(0).await,
            Err(AtomicError::NotFound(_))
        ));
    }
}
