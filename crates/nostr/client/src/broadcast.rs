//! Fan one signed event out to many relays and fold the answers into one
//! result.
//!
//! Only invalid input fails a broadcast. Everything a relay does (accept,
//! reject, time out, refuse auth) becomes that relay's [`RelayOutcome`].

use crate::auth::ChallengeAuthConfig;
use crate::endpoint::{EndpointId, EndpointRegistry, RelayEndpoint, Transport};
use crate::error::RelayConnectionError;
use crate::session::{PublishAck, Session, SessionError, checkin, checkout};
use crate::transport::Connector;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use nostr::{
    AuthenticationError, Event, EventValidator, Keys, Nip01Error, ValidationError,
    is_auth_required_error, unix_now,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Broadcast settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Acceptances needed for the broadcast to count as successful
    pub min_acceptances: usize,
    /// Relays contacted at once
    pub max_in_flight: usize,
    pub per_relay_timeout_ms: u64,
    /// Bound on the whole call; relays still pending are recorded as timeouts
    pub deadline_ms: Option<u64>,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            min_acceptances: 1,
            max_in_flight: 16,
            per_relay_timeout_ms: 10_000,
            deadline_ms: None,
        }
    }
}

impl BroadcastConfig {
    pub fn per_relay_timeout(&self) -> Duration {
        Duration::from_millis(self.per_relay_timeout_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

/// What one relay did with the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Accepted { message: String },
    /// The relay (or its published limits) refused the event. Not retried.
    Rejected { reason: String },
    Unreachable { error: RelayConnectionError },
    AuthFailed { error: AuthenticationError },
}

impl RelayOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, RelayOutcome::Accepted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub endpoint: EndpointId,
    pub outcome: RelayOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastResult {
    pub event_id: String,
    /// Per-relay outcomes keyed by relay URL
    pub relays: BTreeMap<String, RelayReport>,
    pub success: bool,
}

impl BroadcastResult {
    pub fn accepted_count(&self) -> usize {
        self.relays
            .values()
            .filter(|r| r.outcome.is_accepted())
            .count()
    }

    /// Endpoints that did not accept, for a caller-driven re-broadcast.
    pub fn failed_endpoints(&self) -> Vec<EndpointId> {
        self.relays
            .values()
            .filter(|r| !r.outcome.is_accepted())
            .map(|r| r.endpoint)
            .collect()
    }

    pub fn outcome(&self, url: &str) -> Option<&RelayOutcome> {
        self.relays.get(url).map(|r| &r.outcome)
    }
}

/// Input a broadcast refuses before contacting any relay.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("invalid event: {0}")]
    Validation(#[from] ValidationError),

    #[error("event id or signature does not verify")]
    InvalidSignature,

    #[error("event encoding failed: {0}")]
    Codec(#[from] Nip01Error),

    #[error("unknown endpoint {0}")]
    UnknownEndpoint(EndpointId),
}

pub struct RelayBroadcaster {
    registry: Arc<EndpointRegistry>,
    connector: Arc<dyn Connector>,
    keys: Option<Keys>,
    config: BroadcastConfig,
    auth_config: ChallengeAuthConfig,
    validator: EventValidator,
}

impl RelayBroadcaster {
    pub fn new(registry: Arc<EndpointRegistry>, connector: Arc<dyn Connector>) -> Self {
        Self {
            registry,
            connector,
            keys: None,
            config: BroadcastConfig::default(),
            auth_config: ChallengeAuthConfig::default(),
            validator: EventValidator::new(),
        }
    }

    /// Keys used to answer relay auth challenges.
    pub fn with_keys(mut self, keys: Keys) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn with_config(mut self, config: BroadcastConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_auth_config(mut self, config: ChallengeAuthConfig) -> Self {
        self.auth_config = config;
        self
    }

    pub fn with_validator(mut self, validator: EventValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Publish `event` to every endpoint in `endpoints` concurrently.
    pub async fn broadcast(
        &self,
        event: &Event,
        endpoints: &[EndpointId],
        per_relay_timeout: Duration,
    ) -> Result<BroadcastResult, BroadcastError> {
        self.validator.validate_now(event)?;
        if !event.verify()? {
            return Err(BroadcastError::InvalidSignature);
        }

        let mut ids = endpoints.to_vec();
        ids.sort();
        ids.dedup();
        let targets = ids
            .into_iter()
            .map(|id| {
                self.registry
                    .get(id)
                    .ok_or(BroadcastError::UnknownEndpoint(id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!("Broadcasting {} to {} relays", event.id, targets.len());

        let semaphore = Semaphore::new(self.config.max_in_flight.max(1));
        let semaphore = &semaphore;
        let mut pending: FuturesUnordered<_> = targets
            .iter()
            .map(|endpoint| async move {
                let _permit = semaphore.acquire().await;
                let outcome = self.send_to(endpoint, event, per_relay_timeout).await;
                (endpoint, outcome)
            })
            .collect();

        let mut relays = BTreeMap::new();
        let collect = async {
            while let Some((endpoint, outcome)) = pending.next().await {
                debug!("{} -> {:?}", endpoint.url(), outcome);
                relays.insert(
                    endpoint.url().to_string(),
                    RelayReport {
                        endpoint: endpoint.id(),
                        outcome,
                    },
                );
            }
        };
        let deadline = self.config.deadline();
        match deadline {
            Some(limit) => {
                if timeout(limit, collect).await.is_err() {
                    warn!("Broadcast deadline of {:?} reached", limit);
                }
            }
            None => collect.await,
        }
        drop(pending);

        for endpoint in &targets {
            relays
                .entry(endpoint.url().to_string())
                .or_insert_with(|| RelayReport {
                    endpoint: endpoint.id(),
                    outcome: RelayOutcome::Unreachable {
                        error: RelayConnectionError::Timeout(deadline.unwrap_or(per_relay_timeout)),
                    },
                });
        }

        let accepted = relays.values().filter(|r| r.outcome.is_accepted()).count();
        let success = accepted >= self.config.min_acceptances;
        info!(
            "Broadcast of {}: {}/{} relays accepted",
            event.id,
            accepted,
            relays.len()
        );

        Ok(BroadcastResult {
            event_id: event.id.clone(),
            relays,
            success,
        })
    }

    async fn send_to(
        &self,
        endpoint: &RelayEndpoint,
        event: &Event,
        per_relay_timeout: Duration,
    ) -> RelayOutcome {
        if endpoint.transport() == Transport::Http {
            return RelayOutcome::Unreachable {
                error: RelayConnectionError::Unsupported(
                    "publishing requires a socket relay".to_string(),
                ),
            };
        }

        if let Some(limits) = endpoint.limitation()
            && let Err(violation) = limits.check_event(event, unix_now())
        {
            debug!("{} would refuse {}: {}", endpoint.url(), event.id, violation);
            return RelayOutcome::Rejected {
                reason: format!("blocked: {}", violation),
            };
        }

        if !endpoint.breaker().is_allowed().await {
            return RelayOutcome::Unreachable {
                error: RelayConnectionError::CircuitOpen,
            };
        }

        let outcome = match timeout(per_relay_timeout, self.publish(endpoint, event)).await {
            Err(_) => RelayOutcome::Unreachable {
                error: RelayConnectionError::Timeout(per_relay_timeout),
            },
            Ok(Ok(ack)) if ack.accepted => RelayOutcome::Accepted {
                message: ack.message,
            },
            Ok(Ok(ack)) => {
                if is_auth_required_error(&ack.message) {
                    endpoint.set_auth_required(true);
                }
                RelayOutcome::Rejected {
                    reason: ack.message,
                }
            }
            Ok(Err(SessionError::Connection(error))) => RelayOutcome::Unreachable { error },
            Ok(Err(SessionError::Auth(error))) => {
                endpoint.set_auth_required(true);
                RelayOutcome::AuthFailed { error }
            }
        };

        match &outcome {
            RelayOutcome::Unreachable { error } if error.is_relay_fault() => {
                endpoint.breaker().record_failure().await
            }
            _ => endpoint.breaker().record_success().await,
        }
        outcome
    }

    async fn publish(
        &self,
        endpoint: &RelayEndpoint,
        event: &Event,
    ) -> Result<PublishAck, SessionError> {
        let connector = self.connector.as_ref();
        let keys = self.keys.as_ref();
        let require_auth = endpoint.auth_required();

        let (mut session, reused) = checkout(endpoint, connector, &self.auth_config).await?;
        let mut result = session.publish(event, keys, require_auth).await;
        if reused && matches!(result, Err(SessionError::Connection(_))) {
            debug!("Stale session to {}, reconnecting", endpoint.url());
            session = Session::open(connector, endpoint.url(), self.auth_config.clone()).await?;
            result = session.publish(event, keys, require_auth).await;
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::RelayEndpointConfig;
    use crate::message::{ClientMessage, RelayMessage};
    use crate::mock::{MockConnector, MockRelay, ok};
    use crate::recovery::{BackoffPolicy, CircuitBreakerConfig};
    use nostr::{EventTemplate, RelayInformationDocument, RelayLimitation, finalize_event};

    const TIMEOUT: Duration = Duration::from_millis(150);

    fn note(keys: &Keys, content: &str) -> Event {
        finalize_event(&EventTemplate::new(1, content, unix_now()), keys).unwrap()
    }

    fn registry(urls: &[&str]) -> (Arc<EndpointRegistry>, Vec<EndpointId>) {
        registry_with(urls, CircuitBreakerConfig::default())
    }

    fn registry_with(
        urls: &[&str],
        circuit: CircuitBreakerConfig,
    ) -> (Arc<EndpointRegistry>, Vec<EndpointId>) {
        let mut registry = EndpointRegistry::new(circuit);
        let ids = urls
            .iter()
            .map(|url| registry.add(RelayEndpointConfig::new(*url)).unwrap())
            .collect();
        (Arc::new(registry), ids)
    }

    fn broadcaster(registry: Arc<EndpointRegistry>, connector: MockConnector) -> RelayBroadcaster {
        RelayBroadcaster::new(registry, Arc::new(connector)).with_auth_config(ChallengeAuthConfig {
            backoff: BackoffPolicy::Fixed { delay_ms: 1 },
            challenge_timeout_ms: 100,
            response_timeout_ms: 100,
            ..Default::default()
        })
    }

    // =========================================================================
    // Aggregation
    // =========================================================================

    #[tokio::test]
    async fn test_two_accept_one_silent() {
        let keys = Keys::generate();
        let (registry, ids) = registry(&["wss://a.test", "wss://b.test", "wss://c.test"]);
        let connector = MockConnector::new()
            .with_relay("wss://a.test", MockRelay::accepting())
            .with_relay("wss://b.test", MockRelay::accepting())
            .with_relay("wss://c.test", MockRelay::silent());

        let result = broadcaster(registry, connector)
            .broadcast(&note(&keys, "hello"), &ids, TIMEOUT)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.relays.len(), 3);
        assert_eq!(result.accepted_count(), 2);
        let timeouts: Vec<_> = result
            .relays
            .values()
            .filter(|r| {
                r.outcome
                    == RelayOutcome::Unreachable {
                        error: RelayConnectionError::Timeout(TIMEOUT),
                    }
            })
            .collect();
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].endpoint, ids[2]);
        assert_eq!(result.failed_endpoints(), vec![ids[2]]);
    }

    #[tokio::test]
    async fn test_all_reject() {
        let keys = Keys::generate();
        let (registry, ids) = registry(&["wss://a.test", "wss://b.test", "wss://c.test"]);
        let connector = MockConnector::new()
            .with_relay("wss://a.test", MockRelay::rejecting("blocked: spam"))
            .with_relay("wss://b.test", MockRelay::rejecting("pow: difficulty 20 required"))
            .with_relay("wss://c.test", MockRelay::rejecting("invalid: too old"));

        let result = broadcaster(registry, connector)
            .broadcast(&note(&keys, "hello"), &ids, TIMEOUT)
            .await
            .unwrap();

        assert!(!result.success);
        let reasons: Vec<&str> = result
            .relays
            .values()
            .map(|r| match &r.outcome {
                RelayOutcome::Rejected { reason } => reason.as_str(),
                other => panic!("unexpected outcome {:?}", other),
            })
            .collect();
        assert_eq!(
            reasons,
            vec!["blocked: spam", "pow: difficulty 20 required", "invalid: too old"]
        );
    }

    #[tokio::test]
    async fn test_min_acceptances_threshold() {
        let keys = Keys::generate();
        let (registry, ids) = registry(&["wss://a.test", "wss://b.test"]);
        let connector = MockConnector::new()
            .with_relay("wss://a.test", MockRelay::accepting())
            .with_relay("wss://b.test", MockRelay::rejecting("blocked: no"));

        let result = broadcaster(registry, connector)
            .with_config(BroadcastConfig {
                min_acceptances: 2,
                ..Default::default()
            })
            .broadcast(&note(&keys, "hello"), &ids, TIMEOUT)
            .await
            .unwrap();

        assert_eq!(result.accepted_count(), 1);
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_deadline_records_pending_as_timeout() {
        let keys = Keys::generate();
        let (registry, ids) = registry(&["wss://a.test", "wss://b.test"]);
        let connector = MockConnector::new()
            .with_relay("wss://a.test", MockRelay::accepting())
            .with_relay("wss://b.test", MockRelay::silent());
        let deadline = Duration::from_millis(50);

        let result = broadcaster(registry, connector)
            .with_config(BroadcastConfig {
                deadline_ms: Some(50),
                ..Default::default()
            })
            .broadcast(&note(&keys, "hello"), &ids, Duration::from_secs(30))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(
            result.outcome("wss://b.test/"),
            Some(&RelayOutcome::Unreachable {
                error: RelayConnectionError::Timeout(deadline)
            })
        );
    }

    #[tokio::test]
    async fn test_in_flight_bounded() {
        let keys = Keys::generate();
        let urls = ["wss://a.test", "wss://b.test", "wss://c.test", "wss://d.test", "wss://e.test", "wss://f.test"];
        let (registry, ids) = registry(&urls);
        let connector = urls
            .iter()
            .fold(MockConnector::new(), |c, url| c.with_relay(url, MockRelay::accepting()))
            .with_connect_delay(Duration::from_millis(20));
        let connector = Arc::new(connector);

        let result = RelayBroadcaster::new(registry, connector.clone())
            .with_config(BroadcastConfig {
                max_in_flight: 2,
                ..Default::default()
            })
            .broadcast(&note(&keys, "bounded"), &ids, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(result.accepted_count(), 6);
        assert_eq!(connector.connects(), 6);
        assert_eq!(connector.peak_connecting(), 2);
    }

    // =========================================================================
    // Per-relay behavior
    // =========================================================================

    #[tokio::test]
    async fn test_auth_required_then_accepted() {
        let keys = Keys::generate();
        let authed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = authed.clone();
        let relay = MockRelay::new(move |msg| match msg {
            ClientMessage::Auth(event) => {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                vec![ok(event, true, "")]
            }
            ClientMessage::Event(event) if flag.load(std::sync::atomic::Ordering::SeqCst) => {
                vec![ok(event, true, "")]
            }
            ClientMessage::Event(event) => vec![ok(event, false, "auth-required: login first")],
            _ => vec![],
        })
        .greeting(vec![RelayMessage::Auth {
            challenge: "abc".to_string(),
        }]);

        let (registry, ids) = registry(&["wss://a.test"]);
        let connector = MockConnector::new().with_relay("wss://a.test", relay);
        let result = broadcaster(registry.clone(), connector)
            .with_keys(keys.clone())
            .broadcast(&note(&keys, "hello"), &ids, TIMEOUT)
            .await
            .unwrap();

        assert!(result.success);
        assert!(authed.load(std::sync::atomic::Ordering::SeqCst));
        assert!(registry.get(ids[0]).unwrap().auth_required());
    }

    #[tokio::test]
    async fn test_auth_required_without_keys_is_auth_failure() {
        let keys = Keys::generate();
        let (registry, ids) = registry(&["wss://a.test"]);
        let connector = MockConnector::new()
            .with_relay("wss://a.test", MockRelay::rejecting("auth-required: login"));

        let result = broadcaster(registry, connector)
            .broadcast(&note(&keys, "hello"), &ids, TIMEOUT)
            .await
            .unwrap();

        assert_eq!(
            result.outcome("wss://a.test/"),
            Some(&RelayOutcome::AuthFailed {
                error: AuthenticationError::NoSigningKey
            })
        );
    }

    #[tokio::test]
    async fn test_circuit_opens_after_timeouts() {
        let keys = Keys::generate();
        let circuit = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            open_timeout_secs: 60,
        };
        let (registry, ids) = registry_with(&["wss://a.test"], circuit);
        let connector = MockConnector::new().with_relay("wss://a.test", MockRelay::silent());
        let broadcaster = broadcaster(registry, connector);
        let event = note(&keys, "hello");

        let first = broadcaster.broadcast(&event, &ids, TIMEOUT).await.unwrap();
        assert!(matches!(
            first.outcome("wss://a.test/"),
            Some(RelayOutcome::Unreachable {
                error: RelayConnectionError::Timeout(_)
            })
        ));

        let second = broadcaster.broadcast(&event, &ids, TIMEOUT).await.unwrap();
        assert_eq!(
            second.outcome("wss://a.test/"),
            Some(&RelayOutcome::Unreachable {
                error: RelayConnectionError::CircuitOpen
            })
        );
    }

    #[tokio::test]
    async fn test_limit_precheck_skips_send() {
        let keys = Keys::generate();
        let (registry, ids) = registry(&["wss://a.test"]);
        registry
            .apply_info(
                ids[0],
                RelayInformationDocument {
                    limitation: Some(RelayLimitation {
                        max_content_length: Some(3),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .unwrap();
        let relay = MockRelay::accepting();
        let connector = MockConnector::new().with_relay("wss://a.test", relay.clone());

        let result = broadcaster(registry, connector)
            .broadcast(&note(&keys, "far too long"), &ids, TIMEOUT)
            .await
            .unwrap();

        assert!(!result.success);
        assert!(matches!(
            result.outcome("wss://a.test/"),
            Some(RelayOutcome::Rejected { reason }) if reason.starts_with("blocked:")
        ));
        assert!(relay.sent().is_empty());
    }

    #[tokio::test]
    async fn test_http_endpoint_cannot_publish() {
        let keys = Keys::generate();
        let (registry, ids) = registry(&["https://api.test/events"]);
        let result = broadcaster(registry, MockConnector::new())
            .broadcast(&note(&keys, "hello"), &ids, TIMEOUT)
            .await
            .unwrap();
        assert!(matches!(
            result.relays.values().next().map(|r| &r.outcome),
            Some(RelayOutcome::Unreachable {
                error: RelayConnectionError::Unsupported(_)
            })
        ));
    }

    #[tokio::test]
    async fn test_session_is_reused() {
        let keys = Keys::generate();
        let (registry, ids) = registry(&["wss://a.test"]);
        let connector = Arc::new(MockConnector::new().with_relay("wss://a.test", MockRelay::accepting()));
        let broadcaster = RelayBroadcaster::new(registry, connector.clone());

        for content in ["one", "two"] {
            let result = broadcaster
                .broadcast(&note(&keys, content), &ids, TIMEOUT)
                .await
                .unwrap();
            assert!(result.success);
        }
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_endpoints_contacted_once() {
        let keys = Keys::generate();
        let (registry, ids) = registry(&["wss://a.test"]);
        let relay = MockRelay::accepting();
        let connector = MockConnector::new().with_relay("wss://a.test", relay.clone());

        let result = broadcaster(registry, connector)
            .broadcast(&note(&keys, "hello"), &[ids[0], ids[0]], TIMEOUT)
            .await
            .unwrap();
        assert_eq!(result.relays.len(), 1);
        assert_eq!(relay.sent().len(), 1);
    }

    // =========================================================================
    // Input validation
    // =========================================================================

    #[tokio::test]
    async fn test_rejects_invalid_input() {
        let keys = Keys::generate();
        let (registry, ids) = registry(&["wss://a.test"]);
        let broadcaster = broadcaster(registry, MockConnector::new());

        let mut tampered = note(&keys, "hello");
        tampered.content = "goodbye".to_string();
        assert!(matches!(
            broadcaster.broadcast(&tampered, &ids, TIMEOUT).await,
            Err(BroadcastError::InvalidSignature)
        ));

        let mut short = note(&keys, "hello");
        short.id.truncate(10);
        assert!(matches!(
            broadcaster.broadcast(&short, &ids, TIMEOUT).await,
            Err(BroadcastError::Validation(_))
        ));

        let missing = EndpointId::from_index(9);
        assert!(matches!(
            broadcaster.broadcast(&note(&keys, "hi"), &[missing], TIMEOUT).await,
            Err(BroadcastError::UnknownEndpoint(id)) if id == missing
        ));
    }
}
