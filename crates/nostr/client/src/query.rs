//! Query many relays (and optionally the local store) with one filter and
//! merge what comes back.
//!
//! Partial results are normal: a relay that errors or times out contributes
//! nothing and is reported in [`QueryResult::sources`].

use crate::auth::ChallengeAuthConfig;
use crate::cache::{LocalEventStore, StoreError, StoreResult};
use crate::endpoint::{EndpointId, EndpointRegistry, RelayEndpoint, Transport};
use crate::error::RelayConnectionError;
use crate::session::{Session, SessionError, checkin, checkout};
use crate::transport::{Connector, HttpTransport};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use nostr::{
    AuthenticationError, Event, Filter, FilterError, Keys, RequestAuthenticator, sort_events,
    unix_now,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

/// Source key for the local store in [`QueryResult::sources`].
pub const LOCAL_SOURCE: &str = "local";

/// Query settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub per_relay_timeout_ms: u64,
    pub max_in_flight: usize,
    /// Drop relay events whose id or signature does not verify
    pub verify_signatures: bool,
    /// Write newly seen relay events to the local store
    pub persist_results: bool,
    pub deadline_ms: Option<u64>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            per_relay_timeout_ms: 10_000,
            max_in_flight: 16,
            verify_signatures: true,
            persist_results: true,
            deadline_ms: None,
        }
    }
}

impl QueryConfig {
    pub fn per_relay_timeout(&self) -> Duration {
        Duration::from_millis(self.per_relay_timeout_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

/// What one source contributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceReport {
    /// `count` usable events; `dropped` failed verification or the filter
    Returned { count: usize, dropped: usize },
    Unreachable { error: RelayConnectionError },
    AuthFailed { error: AuthenticationError },
    StoreFailed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    /// Deduplicated by id, newest first, truncated to the filter's limit
    pub events: Vec<Event>,
    /// Per-source reports keyed by relay URL, plus [`LOCAL_SOURCE`]
    pub sources: BTreeMap<String, SourceReport>,
    /// Relay events newly written to the local store
    pub persisted: usize,
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),

    #[error("unknown endpoint {0}")]
    UnknownEndpoint(EndpointId),
}

pub struct RelayQueryAggregator {
    registry: Arc<EndpointRegistry>,
    connector: Arc<dyn Connector>,
    http: Arc<dyn HttpTransport>,
    keys: Option<Keys>,
    config: QueryConfig,
    auth_config: ChallengeAuthConfig,
    request_auth: RequestAuthenticator,
}

impl RelayQueryAggregator {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        connector: Arc<dyn Connector>,
        http: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            registry,
            connector,
            http,
            keys: None,
            config: QueryConfig::default(),
            auth_config: ChallengeAuthConfig::default(),
            request_auth: RequestAuthenticator::default(),
        }
    }

    /// Keys used for challenge auth and request tokens.
    pub fn with_keys(mut self, keys: Keys) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_auth_config(mut self, config: ChallengeAuthConfig) -> Self {
        self.auth_config = config;
        self
    }

    pub fn with_request_auth(mut self, request_auth: RequestAuthenticator) -> Self {
        self.request_auth = request_auth;
        self
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub async fn query(
        &self,
        filter: &Filter,
        endpoints: &[EndpointId],
        store: Option<Arc<dyn LocalEventStore>>,
        per_relay_timeout: Duration,
    ) -> Result<QueryResult, QueryError> {
        filter.validate()?;

        let mut ids = endpoints.to_vec();
        ids.sort();
        ids.dedup();
        let targets = ids
            .into_iter()
            .map(|id| self.registry.get(id).ok_or(QueryError::UnknownEndpoint(id)))
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Querying {} relays with {:?}", targets.len(), filter);

        let local = async {
            match &store {
                Some(store) => Some(find_blocking(store.clone(), filter.clone()).await),
                None => None,
            }
        };
        let (local, relays) = tokio::join!(local, self.fan_out(&targets, filter, per_relay_timeout));

        let mut sources = BTreeMap::new();
        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        match local {
            Some(Ok(events)) => {
                sources.insert(
                    LOCAL_SOURCE.to_string(),
                    SourceReport::Returned {
                        count: events.len(),
                        dropped: 0,
                    },
                );
                for event in events {
                    if seen.insert(event.id.clone()) {
                        merged.push(event);
                    }
                }
            }
            Some(Err(e)) => {
                warn!("Local store query failed: {}", e);
                sources.insert(
                    LOCAL_SOURCE.to_string(),
                    SourceReport::StoreFailed {
                        error: e.to_string(),
                    },
                );
            }
            None => {}
        }

        // Relays are merged in URL order so the surviving copy of a shared id
        // does not depend on arrival order.
        let mut fresh = Vec::new();
        for (url, (report, events)) in relays {
            sources.insert(url, report);
            for event in events {
                if seen.insert(event.id.clone()) {
                    fresh.push(event.clone());
                    merged.push(event);
                }
            }
        }

        let mut persisted = 0;
        if let Some(store) = store
            && self.config.persist_results
            && !fresh.is_empty()
        {
            match upsert_blocking(store, fresh).await {
                Ok(count) => persisted = count,
                Err(e) => {
                    warn!("Persisting query results failed: {}", e);
                    sources.insert(
                        LOCAL_SOURCE.to_string(),
                        SourceReport::StoreFailed {
                            error: e.to_string(),
                        },
                    );
                }
            }
        }

        sort_events(&mut merged);
        if let Some(limit) = filter.limit_usize() {
            merged.truncate(limit);
        }

        info!(
            "Query returned {} events from {} sources ({} persisted)",
            merged.len(),
            sources.len(),
            persisted
        );

        Ok(QueryResult {
            events: merged,
            sources,
            persisted,
        })
    }

    async fn fan_out(
        &self,
        targets: &[Arc<RelayEndpoint>],
        filter: &Filter,
        per_relay_timeout: Duration,
    ) -> BTreeMap<String, (SourceReport, Vec<Event>)> {
        let semaphore = Semaphore::new(self.config.max_in_flight.max(1));
        let semaphore = &semaphore;
        let mut pending: FuturesUnordered<_> = targets
            .iter()
            .map(|endpoint| async move {
                let _permit = semaphore.acquire().await;
                let result = self.fetch_from(endpoint, filter, per_relay_timeout).await;
                (endpoint, result)
            })
            .collect();

        let mut results = BTreeMap::new();
        let collect = async {
            while let Some((endpoint, result)) = pending.next().await {
                results.insert(endpoint.url().to_string(), result);
            }
        };
        let deadline = self.config.deadline();
        match deadline {
            Some(limit) => {
                if timeout(limit, collect).await.is_err() {
                    warn!("Query deadline of {:?} reached", limit);
                }
            }
            None => collect.await,
        }
        drop(pending);

        for endpoint in targets {
            results.entry(endpoint.url().to_string()).or_insert_with(|| {
                let error = RelayConnectionError::Timeout(deadline.unwrap_or(per_relay_timeout));
                (SourceReport::Unreachable { error }, Vec::new())
            });
        }
        results
    }

    async fn fetch_from(
        &self,
        endpoint: &RelayEndpoint,
        filter: &Filter,
        per_relay_timeout: Duration,
    ) -> (SourceReport, Vec<Event>) {
        if !endpoint.breaker().is_allowed().await {
            let error = RelayConnectionError::CircuitOpen;
            return (SourceReport::Unreachable { error }, Vec::new());
        }

        let fetched = match timeout(per_relay_timeout, self.fetch(endpoint, filter)).await {
            Ok(result) => result,
            Err(_) => Err(RelayConnectionError::Timeout(per_relay_timeout).into()),
        };

        match &fetched {
            Err(SessionError::Connection(error)) if error.is_relay_fault() => {
                endpoint.breaker().record_failure().await
            }
            _ => endpoint.breaker().record_success().await,
        }

        match fetched {
            Ok(events) => {
                let total = events.len();
                let kept: Vec<Event> = events
                    .into_iter()
                    .filter(|event| self.accept_event(endpoint.url(), filter, event))
                    .collect();
                let report = SourceReport::Returned {
                    count: kept.len(),
                    dropped: total - kept.len(),
                };
                (report, kept)
            }
            Err(SessionError::Connection(error)) => {
                debug!("{} unreachable: {}", endpoint.url(), error);
                (SourceReport::Unreachable { error }, Vec::new())
            }
            Err(SessionError::Auth(error)) => {
                warn!("Authentication with {} failed: {}", endpoint.url(), error);
                (SourceReport::AuthFailed { error }, Vec::new())
            }
        }
    }

    fn accept_event(&self, url: &Url, filter: &Filter, event: &Event) -> bool {
        if !filter.matches(event) {
            warn!("{} returned {} outside the filter", url, event.id);
            return false;
        }
        if self.config.verify_signatures && !matches!(event.verify(), Ok(true)) {
            warn!("{} returned {} which does not verify", url, event.id);
            return false;
        }
        true
    }

    async fn fetch(&self, endpoint: &RelayEndpoint, filter: &Filter) -> Result<Vec<Event>, SessionError> {
        let mut filter = filter.clone();
        if let Some(max) = endpoint.limitation().and_then(|l| l.max_limit) {
            filter.limit = Some(filter.limit.map_or(max, |limit| limit.min(max)));
        }

        match endpoint.transport() {
            Transport::Socket => self.fetch_socket(endpoint, &filter).await,
            Transport::Http => self.fetch_http(endpoint, &filter).await,
        }
    }

    async fn fetch_socket(
        &self,
        endpoint: &RelayEndpoint,
        filter: &Filter,
    ) -> Result<Vec<Event>, SessionError> {
        let connector = self.connector.as_ref();
        let keys = self.keys.as_ref();
        let require_auth = endpoint.auth_required();

        let (mut session, reused) = checkout(endpoint, connector, &self.auth_config).await?;
        let mut result = session.query(filter, keys, require_auth).await;
        if reused && matches!(result, Err(SessionError::Connection(_))) {
            debug!("Stale session to {}, reconnecting", endpoint.url());
            session = Session::open(connector, endpoint.url(), self.auth_config.clone()).await?;
            result = session.query(filter, keys, require_auth).await;
        }

        if session.is_authenticated() {
            endpoint.set_auth_required(true);
        }
        match &result {
            Ok(_) => checkin(endpoint, session).await,
            Err(e) => warn!("Dropping session to {}: {}", endpoint.url(), e),
        }
        result
    }

    /// `POST` the filter; the relay answers with a JSON array of events. A
    /// 401 to an unauthenticated request is retried once with a token.
    async fn fetch_http(
        &self,
        endpoint: &RelayEndpoint,
        filter: &Filter,
    ) -> Result<Vec<Event>, SessionError> {
        let url = endpoint.url();
        let body = serde_json::to_vec(filter)
            .map_err(|e| RelayConnectionError::Protocol(e.to_string()))?;

        let authorization = if endpoint.auth_required() {
            Some(self.authorization(url, &body)?)
        } else {
            None
        };
        let sent_token = authorization.is_some();

        let response = match self.http.post_json(url, body.clone(), authorization).await {
            Err(RelayConnectionError::Http(401)) if !sent_token => {
                info!("{} requires request auth", url);
                endpoint.set_auth_required(true);
                let authorization = self.authorization(url, &body)?;
                let retried = self.http.post_json(url, body, Some(authorization)).await;
                refused_token(url, retried)?
            }
            other if sent_token => refused_token(url, other)?,
            other => other?,
        };

        serde_json::from_slice::<Vec<Event>>(&response)
            .map_err(|e| RelayConnectionError::Protocol(format!("invalid response: {}", e)).into())
    }

    fn authorization(&self, url: &Url, body: &[u8]) -> Result<String, AuthenticationError> {
        let keys = self.keys.as_ref().ok_or(AuthenticationError::NoSigningKey)?;
        self.request_auth
            .authorization_header(keys, url.as_str(), "POST", Some(body), unix_now())
    }
}

/// A 401 or 403 answering a signed request token is an auth failure, not an
/// unreachable relay.
fn refused_token(
    url: &Url,
    response: Result<Vec<u8>, RelayConnectionError>,
) -> Result<Vec<u8>, SessionError> {
    match response {
        Err(RelayConnectionError::Http(status @ (401 | 403))) => {
            warn!("{} refused request token with status {}", url, status);
            Err(AuthenticationError::TokenRefused { status }.into())
        }
        other => Ok(other?),
    }
}

async fn find_blocking(store: Arc<dyn LocalEventStore>, filter: Filter) -> StoreResult<Vec<Event>> {
    tokio::task::spawn_blocking(move || store.find(&filter))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

async fn upsert_blocking(store: Arc<dyn LocalEventStore>, events: Vec<Event>) -> StoreResult<usize> {
    tokio::task::spawn_blocking(move || store.upsert_batch(&events))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}
