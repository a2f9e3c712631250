//! Push channel: a long-lived text connection over which the server streams
//! commits for subjects the client subscribed to.
//!
//! Frames are plain text, `"<VERB> <payload>"`:
//!
//! * client to server: `SUBSCRIBE <subject>`, `UNSUBSCRIBE <subject>`
//! * server to client: `COMMIT <serialized commit>`
//!
//! Anything else the server sends is logged and ignored.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::server_endpoint;
use crate::error::AtomicError;
use crate::store::WeakStore;

/// One text frame on the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushFrame {
    Subscribe(String),
    Unsubscribe(String),
    Commit(String),
    Unknown(String),
}

impl PushFrame {
    pub fn parse(text: &str) -> Self {
        let (verb, payload) = text.split_once(' ').unwrap_or((text, ""));
        match verb {
            "SUBSCRIBE" => PushFrame::Subscribe(payload.to_string()),
            "UNSUBSCRIBE" => PushFrame::Unsubscribe(payload.to_string()),
            "COMMIT" => PushFrame::Commit(payload.to_string()),
            _ => PushFrame::Unknown(text.to_string()),
        }
    }
}

impl fmt::Display for PushFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushFrame::Subscribe(subject) => write!(f, "SUBSCRIBE {subject}"),
            PushFrame::Unsubscribe(subject) => write!(f, "UNSUBSCRIBE {subject}"),
            PushFrame::Commit(commit) => write!(f, "COMMIT {commit}"),
            PushFrame::Unknown(text) => f.write_str(text),
        }
    }
}

/// An open push connection, as a pair of text channels.
///
/// The transport behind it pumps `outgoing` onto the wire and forwards
/// received text frames to `incoming`. Closing `incoming` means the
/// connection is gone.
pub struct PushConnection {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

/// Opens push connections. `atomic-net` implements this over WebSockets.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<PushConnection, AtomicError>;
}

/// `ws(s)://<server>/ws` for a server URL.
pub fn push_channel_url(server: &str) -> Result<String, AtomicError> {
    let mut url = server_endpoint(server, "ws")?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(AtomicError::validation(format!(
                "cannot open a push channel for scheme {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| AtomicError::validation(format!("cannot use {scheme} for {server}")))?;
    Ok(url.into())
}

/// The store's handle to an open connection. Dropping it stops the reader.
pub(crate) struct PushChannel {
    outgoing: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
}

impl PushChannel {
    /// Starts a task that feeds incoming frames to the store, in order.
    ///
    /// The task holds only a weak reference, so it never keeps the store alive.
    pub(crate) fn start(store: WeakStore, connection: PushConnection) -> Self {
        let PushConnection {
            outgoing,
            mut incoming,
        } = connection;
        let reader = tokio::spawn(async move {
            while let Some(text) = incoming.recv().await {
                let Some(store) = store.upgrade() else {
                    break;
                };
                match PushFrame::parse(&text) {
                    PushFrame::Commit(commit) => {
                        if let Err(e) = store.apply_commit(&commit).await {
                            store.handle_error(&e);
                        }
                    }
                    other => debug!(frame = %other, "ignoring push frame"),
                }
            }
            debug!("push channel closed");
        });
        PushChannel { outgoing, reader }
    }

    pub(crate) fn send(&self, frame: PushFrame) {
        if self.outgoing.send(frame.to_string()).is_err() {
            warn!(%frame, "push channel is closed, frame dropped");
        }
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_parse_and_print() {
        assert_eq!(
            PushFrame::parse("COMMIT {\"a\": 1}"),
            PushFrame::Commit("{\"a\": 1}".into())
        );
        assert_eq!(
            PushFrame::Subscribe("https://example.com/a".into()).to_string(),
            "SUBSCRIBE https://example.com/a"
        );
        assert_eq!(
            PushFrame::parse("UNSUBSCRIBE https://x"),
            PushFrame::Unsubscribe("https://x".into())
        );
        assert_eq!(PushFrame::parse("ERROR nope"), PushFrame::Unknown("ERROR nope".into()));
        assert_eq!(PushFrame::parse("PING"), PushFrame::Unknown("PING".into()));
    }

    #[test]
    fn channel_url_follows_server_scheme() {
        assert_eq!(
            push_channel_url("https://atomicdata.dev").unwrap(),
            "wss://atomicdata.dev/ws"
        );
        assert_eq!(
            push_channel_url("http://localhost:9883/some/path?q=1").unwrap(),
            "ws://localhost:9883/some/path/ws"
        );
        assert!(push_channel_url("ftp://example.com").is_err());
    }
}
