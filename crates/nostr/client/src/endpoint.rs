//! Relay endpoints and the arena that owns them.
//!
//! Broadcasts and queries address endpoints by [`EndpointId`]. Reachability
//! state (circuit breaker, auth requirement, NIP-11 document, open session) is
//! shared across concurrent calls and only touched through synchronized
//! accessors.

use crate::error::{ClientError, Result};
use crate::recovery::{CircuitBreaker, CircuitBreakerConfig};
use crate::session::Session;
use nostr::{RelayInformationDocument, RelayLimitation};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use url::Url;

/// How a relay is spoken to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Persistent WebSocket (`ws://`, `wss://`)
    #[default]
    Socket,
    /// Request/response over HTTP (`http://`, `https://`)
    Http,
}

/// Relay entry as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEndpointConfig {
    pub url: String,
    #[serde(default)]
    pub transport: Transport,
    /// Authenticate before the first request instead of waiting to be asked
    #[serde(default)]
    pub auth_required: bool,
}

impl RelayEndpointConfig {
    /// Socket endpoint for `url`, or HTTP when the scheme is `http(s)`.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let transport = if url.starts_with("http://") || url.starts_with("https://") {
            Transport::Http
        } else {
            Transport::Socket
        };
        Self {
            url,
            transport,
            auth_required: false,
        }
    }

    pub fn auth_required(mut self, required: bool) -> Self {
        self.auth_required = required;
        self
    }
}

/// Index of an endpoint in its [`EndpointRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(usize);

impl EndpointId {
    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub struct RelayEndpoint {
    id: EndpointId,
    url: Url,
    transport: Transport,
    auth_required: AtomicBool,
    info: RwLock<Option<RelayInformationDocument>>,
    breaker: CircuitBreaker,
    /// Idle persistent connection, taken by whichever task talks to the relay
    pub(crate) session: tokio::sync::Mutex<Option<Session>>,
}

impl RelayEndpoint {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn auth_required(&self) -> bool {
        self.auth_required.load(Ordering::Acquire)
    }

    pub fn set_auth_required(&self, required: bool) {
        self.auth_required.store(required, Ordering::Release);
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn info(&self) -> Option<RelayInformationDocument> {
        self.info.read().clone()
    }

    /// Published limits, if a capability document has been fetched.
    pub fn limitation(&self) -> Option<RelayLimitation> {
        self.info.read().as_ref().and_then(|doc| doc.limitation.clone())
    }
}

impl fmt::Debug for RelayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayEndpoint")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("transport", &self.transport)
            .field("auth_required", &self.auth_required())
            .finish()
    }
}

/// Arena of relay endpoints.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    circuit: CircuitBreakerConfig,
    endpoints: Vec<Arc<RelayEndpoint>>,
}

impl EndpointRegistry {
    pub fn new(circuit: CircuitBreakerConfig) -> Self {
        Self {
            circuit,
            endpoints: Vec::new(),
        }
    }

    /// Build a registry holding every configured relay.
    pub fn from_config(
        relays: &[RelayEndpointConfig],
        circuit: CircuitBreakerConfig,
    ) -> Result<Self> {
        let mut registry = Self::new(circuit);
        for relay in relays {
            registry.add(relay.clone())?;
        }
        Ok(registry)
    }

    /// Register an endpoint. Adding a URL that is already present returns the
    /// existing id.
    pub fn add(&mut self, config: RelayEndpointConfig) -> Result<EndpointId> {
        let url = Url::parse(config.url.trim())?;
        let scheme_ok = match config.transport {
            Transport::Socket => matches!(url.scheme(), "ws" | "wss"),
            Transport::Http => matches!(url.scheme(), "http" | "https"),
        };
        if !scheme_ok {
            return Err(ClientError::InvalidUrl(format!(
                "{} is not a valid {:?} relay URL",
                url, config.transport
            )));
        }

        if let Some(existing) = self.find_by_url(url.as_str()) {
            return Ok(existing);
        }

        let id = EndpointId(self.endpoints.len());
        info!("Registered relay {} as {}", url, id);
        self.endpoints.push(Arc::new(RelayEndpoint {
            id,
            url,
            transport: config.transport,
            auth_required: AtomicBool::new(config.auth_required),
            info: RwLock::new(None),
            breaker: self.circuit.build(),
            session: tokio::sync::Mutex::new(None),
        }));
        Ok(id)
    }

    pub fn get(&self, id: EndpointId) -> Option<Arc<RelayEndpoint>> {
        self.endpoints.get(id.0).cloned()
    }

    /// Endpoint whose URL matches `url` after NIP-42 normalization.
    pub fn find_by_url(&self, url: &str) -> Option<EndpointId> {
        let wanted = nostr::normalize_relay_url(url);
        self.endpoints
            .iter()
            .find(|e| nostr::normalize_relay_url(e.url.as_str()) == wanted)
            .map(|e| e.id)
    }

    pub fn ids(&self) -> Vec<EndpointId> {
        self.endpoints.iter().map(|e| e.id).collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Record a fetched capability document. A document that requires auth
    /// marks the endpoint; one that doesn't leaves a configured requirement
    /// in place.
    pub fn apply_info(&self, id: EndpointId, doc: RelayInformationDocument) -> Result<()> {
        let endpoint = self
            .get(id)
            .ok_or_else(|| ClientError::UnknownEndpoint(id.to_string()))?;
        if doc.auth_required() {
            endpoint.set_auth_required(true);
        }
        *endpoint.info.write() = Some(doc);
        Ok(())
    }
}
