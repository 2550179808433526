//! WebSocket transport for persistent relay connections.

use crate::error::RelayConnectionError;
use crate::message::{ClientMessage, RelayMessage};
use crate::transport::{Connector, RelayLink};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens `ws://` / `wss://` connections with a connect timeout.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn RelayLink>, RelayConnectionError> {
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(RelayConnectionError::Connect(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                url.scheme()
            )));
        }

        info!("Connecting to relay: {}", url);
        let (stream, _response) = timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| RelayConnectionError::Timeout(self.connect_timeout))?
            .map_err(|e| RelayConnectionError::Connect(e.to_string()))?;
        debug!("Connected to relay: {}", url);

        Ok(Box::new(WsLink {
            url: url.to_string(),
            stream,
        }))
    }
}

/// One live WebSocket to a relay.
pub struct WsLink {
    url: String,
    stream: WsStream,
}

#[async_trait]
impl RelayLink for WsLink {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), RelayConnectionError> {
        let json = message
            .to_json()
            .map_err(|e| RelayConnectionError::Protocol(e.to_string()))?;
        debug!("Sending to {}: {}", self.url, json);
        self.stream
            .send(Message::text(json))
            .await
            .map_err(map_ws_error)
    }

    async fn recv(&mut self) -> Result<RelayMessage, RelayConnectionError> {
        loop {
            let frame = match self.stream.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(map_ws_error(e)),
                None => return Err(RelayConnectionError::Closed),
            };

            match frame {
                Message::Text(text) => match RelayMessage::from_json(text.as_str()) {
                    Ok(message) => return Ok(message),
                    Err(e) => warn!("Ignoring malformed message from {}: {}", self.url, e),
                },
                Message::Close(_) => return Err(RelayConnectionError::Closed),
                // Pings are answered by tungstenite on the next read or write.
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Error closing connection to {}: {}", self.url, e);
        }
    }
}

fn map_ws_error(error: tungstenite::Error) -> RelayConnectionError {
    match error {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            RelayConnectionError::Closed
        }
        other => RelayConnectionError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_websocket_scheme() {
        let connector = WsConnector::default();
        let url = Url::parse("https://relay.example.com").unwrap();
        let err = connector.connect(&url).await.err().unwrap();
        assert!(matches!(err, RelayConnectionError::Connect(_)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = WsConnector::new(Duration::from_secs(2));
        let url = Url::parse(&format!("ws://127.0.0.1:{}", port)).unwrap();
        let err = connector.connect(&url).await.err().unwrap();
        assert!(matches!(err, RelayConnectionError::Connect(_)));
    }
}
