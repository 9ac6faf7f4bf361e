//! WebSocket [`Connector`] built on tokio-tungstenite.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::config::TransportConfig;
use crate::error::{TransportError, TransportResult};
use crate::link::{Connector, Link};
use crate::protocol::Frame;

/// Dials `ws://` and `wss://` servers.
///
/// Each link gets a reader task and a writer task bridging the socket to
/// the link's channels. Both end when either side of the socket does.
#[derive(Debug, Clone, Copy)]
pub struct WsConnector {
    outbound_buffer: usize,
    inbound_buffer: usize,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(&TransportConfig::default())
    }
}

impl WsConnector {
    /// Create a connector sized by `config`.
    #[must_use]
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            outbound_buffer: config.outbound_buffer.max(1),
            inbound_buffer: config.inbound_buffer.max(1),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url, room_id: &str) -> TransportResult<Link> {
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(TransportError::UnsupportedScheme(other.to_string())),
        }

        tracing::debug!(%url, room_id, "Dialing room server");
        let (stream, response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        let (mut sink, mut stream) = stream.split();
        let (outbound, mut to_socket) = mpsc::channel::<Frame>(self.outbound_buffer);
        let (from_socket, inbound) = mpsc::channel::<TransportResult<Frame>>(self.inbound_buffer);

        // Reader: socket -> link. Ends on close, error, or a dropped receiver.
        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let frame = match message {
                    Ok(Message::Text(text)) => Frame::Text(text),
                    Ok(Message::Binary(bytes)) => Frame::Binary(bytes),
                    Ok(Message::Close(close)) => {
                        tracing::debug!(?close, "Server closed the WebSocket");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = from_socket.send(Err(TransportError::WebSocket(e))).await;
                        return;
                    }
                };
                if from_socket.send(Ok(frame)).await.is_err() {
                    return;
                }
            }
        });

        // Writer: link -> socket. Ends when the client drops its sender, then
        // stops the reader so it does not wait on the server's Close reply.
        tokio::spawn(async move {
            while let Some(frame) = to_socket.recv().await {
                let message = match frame {
                    Frame::Text(text) => Message::Text(text),
                    Frame::Binary(bytes) => Message::Binary(bytes),
                };
                if let Err(e) = sink.send(message).await {
                    tracing::debug!(error = %e, "WebSocket write failed");
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
            reader.abort();
        });

        Ok(Link { outbound, inbound })
    }
}
