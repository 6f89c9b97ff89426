//! Socket transport behind the connection supervisor.
//!
//! A transport turns an endpoint URL into a pair of text-frame channels.
//! Resolving `open` is the "open" event; the inbound channel ending is the
//! "close" event. Dropping every outbound sender closes the socket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};
use url::Url;

use super::error::RconError;

/// An open socket, seen as two text-frame channels.
#[derive(Debug)]
pub struct TransportLink {
    /// Frames to send to the server.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Frames received from the server. Ends when the socket closes.
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Trait for opening a persistent socket.
///
/// This trait abstracts the socket layer to enable:
/// - Dependency injection for testing with in-memory transports
/// - Running the client over something other than a WebSocket
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a socket to `url`, resolving once it is ready for frames.
    async fn open(&self, url: &Url) -> Result<TransportLink, RconError>;
}

/// WebSocket transport using tokio-tungstenite.
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &Url) -> Result<TransportLink, RconError> {
        let (stream, _response) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        // Writer: runs until every outbound sender is dropped
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = write.send(Message::Text(frame)).await {
                    warn!(error = %e, "WebSocket send failed");
                    return;
                }
            }
            let _ = write.send(Message::Close(None)).await;
            debug!("WebSocket writer finished");
        });

        // Reader: runs until the socket closes or the receiver is dropped
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("Ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "WebSocket closed by server");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "WebSocket read failed");
                        break;
                    }
                };

                if inbound_tx.send(text).is_err() {
                    break;
                }
            }
            debug!("WebSocket reader finished");
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
