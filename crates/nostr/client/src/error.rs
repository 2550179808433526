//! Client error types

use std::time::Duration;
use thiserror::Error;

/// Transport-level failure talking to one relay.
///
/// These never abort a broadcast or query; they are folded into that relay's
/// outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayConnectionError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection closed by relay")]
    Closed,

    #[error("circuit breaker open")]
    CircuitOpen,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("http status {0}")]
    Http(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl RelayConnectionError {
    /// Whether the error says the relay itself is unhealthy. A relay that
    /// answered with a client error status is up.
    pub fn is_relay_fault(&self) -> bool {
        match self {
            RelayConnectionError::Http(status) => *status >= 500,
            RelayConnectionError::Unsupported(_) => false,
            _ => true,
        }
    }
}

/// Client error type
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] RelayConnectionError),

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] crate::cache::StoreError),

    #[error("Invalid signing key: {0}")]
    Key(#[from] nostr::KeyError),
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
