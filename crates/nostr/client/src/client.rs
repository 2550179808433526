//! High-level client tying the registry, broadcaster, aggregator and local
//! store together from one [`ClientConfig`].

use crate::broadcast::{BroadcastError, BroadcastResult, RelayBroadcaster};
use crate::cache::LocalEventStore;
use crate::config::ClientConfig;
use crate::endpoint::{EndpointId, EndpointRegistry};
use crate::error::Result;
use crate::http::ReqwestTransport;
use crate::info::refresh_endpoint_info;
use crate::query::{QueryError, QueryResult, RelayQueryAggregator};
use crate::relay::WsConnector;
use crate::store::{SqliteEventStore, StoreConfig};
use crate::transport::{Connector, HttpTransport};
use nostr::{Event, Filter, Keys, RelayInformationDocument};
use std::sync::Arc;
use tracing::{info, warn};

pub struct RelayClient {
    registry: Arc<EndpointRegistry>,
    http: Arc<dyn HttpTransport>,
    broadcaster: RelayBroadcaster,
    aggregator: RelayQueryAggregator,
    store: Option<Arc<dyn LocalEventStore>>,
    config: ClientConfig,
}

impl RelayClient {
    /// Client using WebSocket and reqwest transports, and the SQLite store at
    /// `config.store_path` if one is set.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let connector = Arc::new(WsConnector::new(config.connect_timeout()));
        let http = Arc::new(ReqwestTransport::new(config.query.per_relay_timeout())?);
        let store = match &config.store_path {
            Some(path) => {
                let store = SqliteEventStore::open(&StoreConfig::new(path))?;
                Some(Arc::new(store) as Arc<dyn LocalEventStore>)
            }
            None => None,
        };
        Self::with_transports(config, connector, http, store)
    }

    pub fn with_transports(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        http: Arc<dyn HttpTransport>,
        store: Option<Arc<dyn LocalEventStore>>,
    ) -> Result<Self> {
        let registry = Arc::new(EndpointRegistry::from_config(
            &config.relays,
            config.circuit.clone(),
        )?);
        let keys = config.secret_key.as_deref().map(Keys::parse).transpose()?;

        let mut broadcaster = RelayBroadcaster::new(registry.clone(), connector.clone())
            .with_config(config.broadcast.clone())
            .with_auth_config(config.auth.clone());
        let mut aggregator = RelayQueryAggregator::new(registry.clone(), connector, http.clone())
            .with_config(config.query.clone())
            .with_auth_config(config.auth.clone())
            .with_request_auth(config.request_auth.build());
        if let Some(keys) = keys {
            info!("Signing as {}", keys.public_key_hex());
            broadcaster = broadcaster.with_keys(keys.clone());
            aggregator = aggregator.with_keys(keys);
        }

        Ok(Self {
            registry,
            http,
            broadcaster,
            aggregator,
            store,
            config,
        })
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn store(&self) -> Option<&Arc<dyn LocalEventStore>> {
        self.store.as_ref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Broadcast to every configured relay.
    pub async fn broadcast(&self, event: &Event) -> std::result::Result<BroadcastResult, BroadcastError> {
        self.broadcast_to(event, &self.registry.ids()).await
    }

    pub async fn broadcast_to(
        &self,
        event: &Event,
        endpoints: &[EndpointId],
    ) -> std::result::Result<BroadcastResult, BroadcastError> {
        self.broadcaster
            .broadcast(event, endpoints, self.config.broadcast.per_relay_timeout())
            .await
    }

    /// Query every configured relay and the local store.
    pub async fn query(&self, filter: &Filter) -> std::result::Result<QueryResult, QueryError> {
        self.query_from(filter, &self.registry.ids()).await
    }

    pub async fn query_from(
        &self,
        filter: &Filter,
        endpoints: &[EndpointId],
    ) -> std::result::Result<QueryResult, QueryError> {
        self.aggregator
            .query(
                filter,
                endpoints,
                self.store.clone(),
                self.config.query.per_relay_timeout(),
            )
            .await
    }

    /// Fetch the information document of every relay, recording limits and
    /// auth requirements. Failures are logged and returned per endpoint.
    pub async fn refresh_info(&self) -> Vec<(EndpointId, Result<RelayInformationDocument>)> {
        let mut results = Vec::new();
        for id in self.registry.ids() {
            let result = refresh_endpoint_info(&self.registry, self.http.as_ref(), id).await;
            if let Err(e) = &result {
                warn!("No relay information for {}: {}", id, e);
            }
            results.push((id, result));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::RelayOutcome;
    use crate::cache::InMemoryEventStore;
    use crate::error::ClientError;
    use crate::mock::{MockConnector, MockHttp, MockRelay};
    use nostr::{EventTemplate, finalize_event, unix_now};
    use std::time::Duration;

    fn config(relays: &str) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.broadcast.per_relay_timeout_ms = 150;
        config.query.per_relay_timeout_ms = 150;
        config
            .apply_overrides_from(|key| (key == crate::config::ENV_RELAYS).then(|| relays.to_string()))
            .unwrap();
        config
    }

    #[tokio::test]
    async fn test_broadcast_then_query_from_store() {
        let keys = Keys::generate();
        let event = finalize_event(&EventTemplate::new(1, "hello", unix_now()), &keys).unwrap();
        let connector = MockConnector::new()
            .with_relay("wss://one.test", MockRelay::accepting())
            .with_relay("wss://two.test", MockRelay::serving(vec![event.clone()]));
        let store: Arc<dyn LocalEventStore> = Arc::new(InMemoryEventStore::default());

        let client = RelayClient::with_transports(
            config("wss://one.test,wss://two.test"),
            Arc::new(connector),
            Arc::new(MockHttp::unused()),
            Some(store.clone()),
        )
        .unwrap();
        assert_eq!(client.registry().len(), 2);

        let result = client.broadcast(&event).await.unwrap();
        assert!(result.success);
        assert!(matches!(
            result.outcome("wss://two.test/"),
            Some(RelayOutcome::Unreachable { .. })
        ));

        let result = client.query(&Filter::new().kinds([1])).await.unwrap();
        assert_eq!(result.events, vec![event.clone()]);
        assert_eq!(result.persisted, 1);
        assert_eq!(store.find(&Filter::new()).unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn test_refresh_info_reports_each_endpoint() {
        let http = MockHttp::unused().with_document(
            "https://one.test/",
            r#"{"supported_nips":[1,42],"limitation":{"auth_required":true}}"#,
        );
        let client = RelayClient::with_transports(
            config("wss://one.test,wss://two.test"),
            Arc::new(MockConnector::new()),
            Arc::new(http),
            None,
        )
        .unwrap();

        let results = client.refresh_info().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());

        let id = client.registry().find_by_url("wss://one.test").unwrap();
        assert!(client.registry().get(id).unwrap().auth_required());
    }

    #[test]
    fn test_invalid_secret_key() {
        let mut config = ClientConfig::default();
        config.secret_key = Some("not hex".to_string());
        let err = RelayClient::with_transports(
            config,
            Arc::new(MockConnector::new()),
            Arc::new(MockHttp::unused()),
            None,
        )
        .err()
        .unwrap();
        assert!(matches!(err, ClientError::Key(_)));
    }

    #[test]
    fn test_from_config_opens_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config("wss://one.test");
        config.store_path = Some(dir.path().join("events.db"));
        config.connect_timeout_ms = 500;

        let client = RelayClient::from_config(config).unwrap();
        assert!(client.store().is_some());
        assert_eq!(client.config().connect_timeout(), Duration::from_millis(500));
    }
}
