use async_trait::async_trait;
use atomic_core::{AtomicError, PushConnection, PushConnector};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, instrument, warn};

use crate::error::NetError;

/// [`PushConnector`] over a WebSocket.
///
/// Each connection runs a writer task that drains the outgoing channel
/// and a reader task that forwards text frames. Both stop when the store
/// drops its end of the connection or the socket closes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl PushConnector for WebSocketConnector {
    #[instrument(skip(self))]
    async fn connect(&self, url: &str) -> Result<PushConnection, AtomicError> {
        let (stream, _) = connect_async(url).await.map_err(NetError::from)?;
        let (mut writer, mut reader) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let (incoming_tx, incoming) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if let Err(error) = writer.send(Message::Text(text.into())).await {
                    warn!(%error, "push channel write failed");
                    break;
                }
            }
            let _ = writer.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = reader.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if incoming_tx.send(text.as_str().to_owned()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        warn!(%error, "push channel read failed");
                        break;
                    }
                }
            }
            debug!("push channel reader finished");
        });

        debug!("push channel connected");
        Ok(PushConnection { outgoing, incoming })
    }
}
