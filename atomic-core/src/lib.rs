//! Client core for Atomic Data: a local cache of linked-data resources kept
//! in sync with a server through signed commits.
//!
//! Core concepts:
//! - **Resource**: a subject URL plus property values, with a load status
//! - **Value / Datatype**: typed property values, validated per Property
//! - **Commit**: a signed set/remove/destroy change to one resource
//! - **Agent**: the ed25519 identity that signs commits and requests
//! - **Store**: the cache, subscriber registry and push channel owner
//! - **Collection**: a paginated cursor over a server-side query
//!
//! The network is reached through two traits, [`HttpClient`] and
//! [`PushConnector`]. The `atomic-net` crate implements them with reqwest
//! and WebSockets; [`MemoryServer`] implements `HttpClient` in memory.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use atomic_core::{MemoryServer, Store, urls};
//! use serde_json::json;
//!
//! let store = Store::new("https://example.com", Arc::new(MemoryServer::new())).unwrap();
//! store
//!     .populate(&json!([{ "@id": "https://example.com/hello", (urls::NAME): "Hello" }]))
//!     .unwrap();
//!
//! let hello = store.get_resource_loading("https://example.com/hello", false);
//! assert!(hello.is_ready());
//! assert_eq!(hello.get(urls::NAME).unwrap().as_str().unwrap(), "Hello");
//! ```

mod agent;
mod client;
mod collection;
mod commit;
mod config;
mod datatype;
mod error;
mod parse;
mod property;
mod resource;
mod store;
mod sync;
mod value;

pub mod urls;

pub use agent::{
    Agent, HEADER_AGENT, HEADER_PUBLIC_KEY, HEADER_SIGNATURE, HEADER_TIMESTAMP, KeyPair,
    generate_key_pair, generate_public_key_from_private, verify_signature,
};
pub use client::{
    HttpClient, HttpResponse, MemoryServer, RecordedRequest, commit_endpoint, proxy_url,
};
pub use collection::{Collection, CollectionParams, DEFAULT_PAGE_SIZE};
pub use commit::{Commit, CommitBuilder, serialize_deterministically};
pub use config::{
    ConfigError, DEFAULT_SERVER_URL, ENV_AGENT_SECRET, ENV_SERVER_URL, StoreConfig,
    apply_env_overrides, config_path, load_config, load_config_from,
};
pub use datatype::Datatype;
pub use error::{AtomicError, ErrorKind};
pub use parse::{parse_json_ad_array, parse_json_ad_resource, parse_json_ad_string};
pub use property::Property;
pub use resource::{Resource, ResourceStatus, UNKNOWN_SUBJECT};
pub use store::{
    ErrorHandler, FetchOptions, Store, SubscriberCallback, SubscriberId, Subscription,
    UpdateWaiter,
};
pub use sync::{PushConnection, PushConnector, PushFrame, push_channel_url};
pub use value::{SubResource, Value};
