//! Client configuration.
//!
//! Loaded from TOML, then overridden from `NOSTR_CLIENT_*` environment
//! variables. Every section has defaults, so an empty file is valid.

use crate::auth::ChallengeAuthConfig;
use crate::broadcast::BroadcastConfig;
use crate::endpoint::RelayEndpointConfig;
use crate::query::QueryConfig;
use crate::recovery::CircuitBreakerConfig;
use nostr::{DEFAULT_TIMESTAMP_WINDOW, RequestAuthenticator};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const ENV_RELAYS: &str = "NOSTR_CLIENT_RELAYS";
pub const ENV_PER_RELAY_TIMEOUT_MS: &str = "NOSTR_CLIENT_PER_RELAY_TIMEOUT_MS";
pub const ENV_MIN_ACCEPTANCES: &str = "NOSTR_CLIENT_MIN_ACCEPTANCES";
pub const ENV_AUTH_WINDOW_SECS: &str = "NOSTR_CLIENT_AUTH_WINDOW_SECS";
pub const ENV_SECRET_KEY: &str = "NOSTR_CLIENT_SECRET_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Request token settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestAuthConfig {
    /// Maximum age in seconds of an accepted token. Tokens dated in the future
    /// are rejected regardless of the window.
    pub window_secs: u64,
}

impl Default for RequestAuthConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_TIMESTAMP_WINDOW,
        }
    }
}

impl RequestAuthConfig {
    pub fn build(&self) -> RequestAuthenticator {
        RequestAuthenticator::new(self.window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Hex secret key used for signing auth events and request tokens
    pub secret_key: Option<String>,
    pub connect_timeout_ms: u64,
    /// SQLite database for the local event store; none keeps no store
    pub store_path: Option<PathBuf>,
    pub relays: Vec<RelayEndpointConfig>,
    pub broadcast: BroadcastConfig,
    pub query: QueryConfig,
    pub auth: ChallengeAuthConfig,
    pub request_auth: RequestAuthConfig,
    pub circuit: CircuitBreakerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relays: Vec::new(),
            secret_key: None,
            broadcast: BroadcastConfig::default(),
            query: QueryConfig::default(),
            auth: ChallengeAuthConfig::default(),
            request_auth: RequestAuthConfig::default(),
            circuit: CircuitBreakerConfig::default(),
            connect_timeout_ms: 10_000,
            store_path: None,
        }
    }
}

impl ClientConfig {
    /// Load a TOML file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Unset keys leave the field alone.
    pub fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(relays) = lookup(ENV_RELAYS) {
            debug!("Relays overridden from {}", ENV_RELAYS);
            self.relays = relays
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(RelayEndpointConfig::new)
                .collect();
        }
        if let Some(value) = lookup(ENV_PER_RELAY_TIMEOUT_MS) {
            let timeout = parse_number(ENV_PER_RELAY_TIMEOUT_MS, &value)?;
            self.broadcast.per_relay_timeout_ms = timeout;
            self.query.per_relay_timeout_ms = timeout;
        }
        if let Some(value) = lookup(ENV_MIN_ACCEPTANCES) {
            self.broadcast.min_acceptances = parse_number(ENV_MIN_ACCEPTANCES, &value)?;
        }
        if let Some(value) = lookup(ENV_AUTH_WINDOW_SECS) {
            self.request_auth.window_secs = parse_number(ENV_AUTH_WINDOW_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_SECRET_KEY) {
            self.secret_key = Some(value.trim().to_string());
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
