//! Websocket transport for Jetstream.
//!
//! [`WebSocketTransport`] opens the subscription with `tokio-tungstenite`
//! and adapts the frame stream to [`MessageStream`]: text frames are passed
//! through, UTF-8 binary frames are decoded, control frames are swallowed.

use super::{MessageStream, StreamTransport, TransportError};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// [`StreamTransport`] over a websocket connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn connect(&self, url: &Url) -> Result<Box<dyn MessageStream>, TransportError> {
        let (socket, response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        debug!(status = %response.status(), "Websocket handshake complete");
        Ok(Box::new(JetstreamSocket { socket }))
    }
}

struct JetstreamSocket {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl MessageStream for JetstreamSocket {
    async fn next_message(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.socket.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        warn!("Skipping binary frame that is not valid UTF-8");
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!(frame = ?frame, "Close frame received");
                    return None;
                }
                // Pings are answered by tungstenite on the next read
                Ok(_) => {}
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(TransportError::Stream(e.to_string()))),
            }
        }
    }
}
