//! Transport seams between relay logic and the network.
//!
//! Broadcast and query code only sees these traits. The production
//! implementations live in `relay` (WebSocket) and `http` (reqwest).

use crate::error::RelayConnectionError;
use crate::message::{ClientMessage, RelayMessage};
use async_trait::async_trait;
use url::Url;

/// An open persistent connection to one relay.
#[async_trait]
pub trait RelayLink: Send {
    async fn send(&mut self, message: &ClientMessage) -> Result<(), RelayConnectionError>;

    /// Next relay message. `Err(Closed)` once the relay hangs up.
    async fn recv(&mut self) -> Result<RelayMessage, RelayConnectionError>;

    async fn close(&mut self);
}

/// Opens persistent relay connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn RelayLink>, RelayConnectionError>;
}

/// Request/response transport for HTTP relays and capability documents.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POST a JSON body, returning the response body on a 2xx status.
    async fn post_json(
        &self,
        url: &Url,
        body: Vec<u8>,
        authorization: Option<String>,
    ) -> Result<Vec<u8>, RelayConnectionError>;

    /// GET with the given `Accept` header, returning the body on a 2xx status.
    async fn get(&self, url: &Url, accept: &str) -> Result<Vec<u8>, RelayConnectionError>;
}
