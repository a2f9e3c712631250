//! Network transports for `atomic-core`.
//!
//! - [`ReqwestClient`]: the store's [`HttpClient`](atomic_core::HttpClient) over reqwest
//! - [`WebSocketConnector`]: the push channel over tokio-tungstenite
//!
//! [`store_from_config`] wires both into a [`Store`].

mod error;
mod http;
mod ws;

use std::sync::Arc;

use atomic_core::{AtomicError, Store, StoreConfig};

pub use error::NetError;
pub use http::ReqwestClient;
pub use ws::WebSocketConnector;

/// Builds a store that talks to its server over HTTP and WebSockets.
///
/// The push channel is opened unless disabled in `config`. Failing to open
/// it is logged and does not fail the call.
pub async fn store_from_config(config: &StoreConfig) -> Result<Store, AtomicError> {
    let store = Store::from_config(config, Arc::new(ReqwestClient::new()))?;
    store.set_push_connector(Arc::new(WebSocketConnector)).await;
    Ok(store)
}
