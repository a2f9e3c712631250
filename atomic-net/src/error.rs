use atomic_core::AtomicError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

impl From<NetError> for AtomicError {
    fn from(e: NetError) -> Self {
        AtomicError::Network(e.to_string())
    }
}
