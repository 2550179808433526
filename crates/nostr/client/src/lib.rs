//! Multi-relay Nostr client.
//!
//! This crate provides:
//! - Broadcasting signed events to many relays with per-relay outcomes
//! - Querying many relays plus a local store, merged and deduplicated
//! - NIP-42 challenge authentication over persistent connections
//! - NIP-98 request tokens for HTTP relays
//! - NIP-11 capability documents and limit prechecks
//! - In-memory and SQLite local event stores
//!
//! # Example
//!
//! ```rust,no_run
//! use nostr::{EventTemplate, Filter, Keys, finalize_event, unix_now};
//! use nostr_client::{ClientConfig, RelayClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Relays, timeouts and the signing key come from the file and
//!     // NOSTR_CLIENT_* variables.
//!     let config = ClientConfig::load("nostr-client.toml")?;
//!     let keys = Keys::parse(config.secret_key.as_deref().unwrap_or_default())?;
//!     let client = RelayClient::from_config(config)?;
//!
//!     let event = finalize_event(&EventTemplate::new(1, "hello", unix_now()), &keys)?;
//!     let result = client.broadcast(&event).await?;
//!     println!("accepted by {} relays", result.accepted_count());
//!
//!     let found = client.query(&Filter::new().kinds([1]).limit(20)).await?;
//!     for event in found.events {
//!         println!("{}: {}", event.id, event.content);
//!     }
//!     Ok(())
//! }
//! ```

mod auth;
mod broadcast;
mod cache;
mod client;
mod config;
mod endpoint;
mod error;
mod http;
mod info;
mod message;
mod query;
mod recovery;
mod relay;
mod session;
mod store;
mod transport;

#[cfg(test)]
mod mock;

// Client facade and configuration
pub use client::RelayClient;
pub use config::{
    ClientConfig, ConfigError, ENV_AUTH_WINDOW_SECS, ENV_MIN_ACCEPTANCES,
    ENV_PER_RELAY_TIMEOUT_MS, ENV_RELAYS, ENV_SECRET_KEY, RequestAuthConfig,
};
pub use error::{ClientError, RelayConnectionError, Result};

// Endpoints and reachability
pub use endpoint::{EndpointId, EndpointRegistry, RelayEndpoint, RelayEndpointConfig, Transport};
pub use info::{fetch_relay_info, info_url, refresh_endpoint_info};
pub use recovery::{BackoffPolicy, CircuitBreaker, CircuitBreakerConfig, CircuitState};

// Broadcast and query
pub use broadcast::{
    BroadcastConfig, BroadcastError, BroadcastResult, RelayBroadcaster, RelayOutcome, RelayReport,
};
pub use query::{
    LOCAL_SOURCE, QueryConfig, QueryError, QueryResult, RelayQueryAggregator, SourceReport,
};

// Challenge authentication and sessions
pub use auth::{AuthState, AuthStep, ChallengeAuthConfig, ChallengeAuthenticator};
pub use session::{PublishAck, Session, SessionError, generate_subscription_id};

// Wire protocol and transports
pub use http::ReqwestTransport;
pub use message::{ClientMessage, MessageError, RelayMessage};
pub use relay::WsConnector;
pub use transport::{Connector, HttpTransport, RelayLink};

// Local event stores
pub use cache::{
    CacheConfig, EventCache, InMemoryEventStore, LocalEventStore, StoreError, StoreResult,
};
pub use store::{SqliteEventStore, StoreConfig};
